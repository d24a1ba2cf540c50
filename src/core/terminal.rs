use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_banner() {
    println!(
        "\n{} {} {}\n",
        PACKAGE,
        style("filestage").bold().cyan(),
        style(concat!("v", env!("CARGO_PKG_VERSION"))).dim()
    );
}

enum Line {
    Command(String, String),
    Status(String, String),
    Hint(String),
    Blank,
}

/// A titled block of aligned terminal output.
pub struct GuideSection {
    title: String,
    lines: Vec<Line>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.lines
            .push(Line::Command(name.to_string(), description.to_string()));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(Line::Status(label.to_string(), value.to_string()));
        self
    }

    pub fn hint(mut self, hint: &str) -> Self {
        self.lines.push(Line::Hint(hint.to_string()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(Line::Blank);
        self
    }

    fn label_width(&self) -> usize {
        self.lines
            .iter()
            .map(|line| match line {
                Line::Command(name, _) | Line::Status(name, _) => name.chars().count(),
                Line::Hint(_) | Line::Blank => 0,
            })
            .max()
            .unwrap_or(0)
    }

    pub fn print(&self) {
        println!("\n {}", style(&self.title).bold().underlined());
        let width = self.label_width();

        for line in &self.lines {
            match line {
                Line::Command(name, description) => {
                    println!("   {:<width$}  {}", style(name).green(), description, width = width)
                }
                Line::Status(label, value) => {
                    println!("   {:<width$}  {}", style(label).cyan(), value, width = width)
                }
                Line::Hint(hint) => println!("   {}", style(hint).dim()),
                Line::Blank => println!(),
            }
        }
    }
}
