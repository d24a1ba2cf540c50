use std::path::Path;

pub fn is_csv_file(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

/// Rows a staged file carries. CSV files count data records, excluding the
/// header, blank lines and records whose fields are all empty. Anything
/// else counts raw lines.
pub fn count_rows(bytes: &[u8], file_name: &str) -> i64 {
    if is_csv_file(file_name) {
        count_csv_records(bytes)
    } else {
        count_lines(bytes)
    }
}

fn count_csv_records(bytes: &[u8]) -> i64 {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut count = 0;
    for record in reader.byte_records() {
        let Ok(record) = record else {
            break;
        };
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        count += 1;
    }
    count
}

fn count_lines(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let newlines = bytes.iter().filter(|&&b| b == b'\n').count() as i64;
    if bytes.last() == Some(&b'\n') {
        newlines
    } else {
        newlines + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_extension_is_case_insensitive() {
        assert!(is_csv_file("students.csv"));
        assert!(is_csv_file("STUDENTS.CSV"));
        assert!(!is_csv_file("students.csv.bak"));
        assert!(!is_csv_file("students"));
        assert!(!is_csv_file("students.txt"));
    }

    #[test]
    fn header_and_trailing_blank_line_are_not_counted() {
        let content = b"id,name\n1,Ada\n2,Grace\n3,Edsger\n\n";
        assert_eq!(count_rows(content, "students.csv"), 3);
    }

    #[test]
    fn blank_and_empty_field_records_are_skipped() {
        let content = b"id,name\n1,Ada\n\n  ,  \n,\n2,Grace\n";
        assert_eq!(count_rows(content, "students.csv"), 2);
    }

    #[test]
    fn ragged_records_still_count() {
        let content = b"a,b,c\n1,2\n3,4,5,6\n";
        assert_eq!(count_rows(content, "ragged.csv"), 2);
    }

    #[test]
    fn header_only_csv_has_no_rows() {
        assert_eq!(count_rows(b"id,name\n", "empty.csv"), 0);
        assert_eq!(count_rows(b"", "empty.csv"), 0);
    }

    #[test]
    fn non_csv_counts_lines() {
        assert_eq!(count_rows(b"one\ntwo\nthree\n", "data.txt"), 3);
        assert_eq!(count_rows(b"one\ntwo\nthree", "data.txt"), 3);
        assert_eq!(count_rows(b"", "data.txt"), 0);
    }
}
