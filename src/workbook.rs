//! A plain-text workbook format: named CSV sheets in one file.
//!
//! A workbook file holds one or more sheets, each introduced by a
//! marker line `### SheetName` and followed by a CSV table whose first
//! record is the header row. The format round-trips through a text
//! editor or spreadsheet tooling without any binary dependencies.

use std::io::Write;

use crate::Error;

/// The line prefix introducing a sheet.
const SHEET_MARKER: &str = "### ";

/// One named table: a header row and its data rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    /// The sheet name, e.g. `Transactions`.
    pub name: String,
    /// The column headers.
    pub headers: Vec<String>,
    /// The data rows. Rows are padded or truncated to the header width
    /// on read.
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    /// Create an empty sheet with the given headers.
    pub fn new(name: impl Into<String>, headers: &[&str]) -> Self {
        Self {
            name: name.into(),
            headers: headers.iter().map(|header| (*header).to_owned()).collect(),
            rows: Vec::new(),
        }
    }

    /// The index of a header, if present.
    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|candidate| candidate == header)
    }

    /// A cell by row and header name, empty string if the column is
    /// missing.
    pub fn cell<'a>(&self, row: &'a [String], header: &str) -> &'a str {
        self.column_index(header)
            .and_then(|index| row.get(index))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// An ordered collection of sheets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    /// The sheets, in file order.
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    /// Look up a sheet by name.
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|sheet| sheet.name == name)
    }

    /// Serialise the workbook to its text form.
    ///
    /// # Errors
    /// Returns [Error::InvalidWorkbook] if CSV serialisation fails,
    /// which only happens on I/O errors to the in-memory buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut output = Vec::new();

        for sheet in &self.sheets {
            writeln!(output, "{SHEET_MARKER}{}", sheet.name)
                .map_err(|error| Error::InvalidWorkbook(error.to_string()))?;

            let mut writer = csv::Writer::from_writer(&mut output);
            writer
                .write_record(&sheet.headers)
                .map_err(|error| Error::InvalidWorkbook(error.to_string()))?;

            for row in &sheet.rows {
                writer
                    .write_record(row)
                    .map_err(|error| Error::InvalidWorkbook(error.to_string()))?;
            }

            writer
                .flush()
                .map_err(|error| Error::InvalidWorkbook(error.to_string()))?;
            drop(writer);

            writeln!(output).map_err(|error| Error::InvalidWorkbook(error.to_string()))?;
        }

        Ok(output)
    }

    /// Parse a workbook from its text form.
    ///
    /// Unknown content before the first marker line is rejected. Sheet
    /// bodies are parsed as CSV with the first record as headers; short
    /// rows are padded with empty cells and long rows truncated so
    /// every row matches the header width.
    ///
    /// # Errors
    /// Returns [Error::InvalidWorkbook] for malformed CSV or content
    /// outside any sheet.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidWorkbook("file is not valid UTF-8".to_owned()))?;

        let mut sheets = Vec::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            if let Some(name) = line.strip_prefix(SHEET_MARKER) {
                if let Some((name, body)) = current.take() {
                    sheets.push(parse_sheet(name, &body)?);
                }
                current = Some((name.trim().to_owned(), String::new()));
            } else if let Some((_, body)) = current.as_mut() {
                body.push_str(line);
                body.push('\n');
            } else if !line.trim().is_empty() {
                return Err(Error::InvalidWorkbook(
                    "content before the first sheet marker".to_owned(),
                ));
            }
        }

        if let Some((name, body)) = current.take() {
            sheets.push(parse_sheet(name, &body)?);
        }

        if sheets.is_empty() {
            return Err(Error::InvalidWorkbook("no sheets found".to_owned()));
        }

        Ok(Self { sheets })
    }
}

fn parse_sheet(name: String, body: &str) -> Result<Sheet, Error> {
    if name.is_empty() {
        return Err(Error::InvalidWorkbook("sheet marker with no name".to_owned()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(body.as_bytes());

    let headers: Vec<String> = match reader.headers() {
        Ok(headers) if !headers.is_empty() => {
            headers.iter().map(|header| header.to_owned()).collect()
        }
        _ => {
            return Ok(Sheet {
                name,
                headers: Vec::new(),
                rows: Vec::new(),
            });
        }
    };

    let width = headers.len();
    let mut rows = Vec::new();

    for record in reader.records() {
        let record = record.map_err(|error| {
            Error::InvalidWorkbook(format!("sheet \"{name}\": {error}"))
        })?;

        let mut row: Vec<String> = record.iter().map(|cell| cell.to_owned()).collect();
        row.resize(width, String::new());
        rows.push(row);
    }

    Ok(Sheet { name, headers, rows })
}

#[cfg(test)]
mod workbook_tests {
    use crate::Error;

    use super::{Sheet, Workbook};

    #[test]
    fn workbook_round_trips_through_text_form() {
        let mut sheet = Sheet::new("Categories", &["name", "type", "icon"]);
        sheet.rows.push(vec!["Ăn uống".to_owned(), "Chi".to_owned(), "🍔".to_owned()]);
        sheet.rows.push(vec!["Lương".to_owned(), "Thu".to_owned(), String::new()]);

        let workbook = Workbook { sheets: vec![sheet] };
        let bytes = workbook.to_bytes().unwrap();
        let parsed = Workbook::from_bytes(&bytes).unwrap();

        assert_eq!(parsed, workbook);
    }

    #[test]
    fn cells_containing_commas_and_quotes_survive() {
        let mut sheet = Sheet::new("Notes", &["note"]);
        sheet.rows.push(vec!["ăn trưa, \"phở\" ngon".to_owned()]);

        let workbook = Workbook { sheets: vec![sheet] };
        let bytes = workbook.to_bytes().unwrap();
        let parsed = Workbook::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.sheets[0].rows[0][0], "ăn trưa, \"phở\" ngon");
    }

    #[test]
    fn multiple_sheets_parse_in_order() {
        let text = "### Users\nusername,name\nalice,Alice\n\n### Categories\nname,type\nLương,Thu\n";

        let workbook = Workbook::from_bytes(text.as_bytes()).unwrap();

        assert_eq!(workbook.sheets.len(), 2);
        assert_eq!(workbook.sheets[0].name, "Users");
        assert_eq!(workbook.sheets[1].name, "Categories");
        assert_eq!(workbook.sheet("Categories").unwrap().rows[0][0], "Lương");
    }

    #[test]
    fn short_rows_are_padded_to_header_width() {
        let text = "### Users\nusername,name,role\nalice\n";

        let workbook = Workbook::from_bytes(text.as_bytes()).unwrap();
        let sheet = &workbook.sheets[0];

        assert_eq!(sheet.rows[0], vec!["alice".to_owned(), String::new(), String::new()]);
        assert_eq!(sheet.cell(&sheet.rows[0], "role"), "");
    }

    #[test]
    fn content_before_first_marker_is_rejected() {
        let result = Workbook::from_bytes(b"username,name\nalice,Alice\n");

        assert!(matches!(result, Err(Error::InvalidWorkbook(_))));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(Workbook::from_bytes(b""), Err(Error::InvalidWorkbook(_))));
    }
}
