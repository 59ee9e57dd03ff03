use std::io::{self, Write};
use std::mem::take;

use chrono::{NaiveDateTime, TimeZone, Utc};
use indexmap::IndexSet;

use crate::collector::{identity_key, FieldGroup, Record};

use super::{CheckpointError, CheckpointResult};

const BOM: char = '\u{feff}';
const SEP: char = ',';
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const TECH_PREFIX: &str = "tech_";
pub const INFO_PREFIX: &str = "info_";
pub const SOURCE_FILE: &str = "source_file";
pub const PRICE_VALUE: &str = "price_value";
pub const BASE_COLUMNS: [&str; 4] = ["title", "price", "url", "scrape_date"];

/* ---------------- Parsing ---------------- */

/// Quote-aware CSV parser, tolerant of CRLF and a leading BOM.
pub fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let text = text.strip_prefix(BOM).unwrap_or(text);
    let mut rows = Vec::new();
    let mut field = String::new();
    let mut row = Vec::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if matches!(chars.peek(), Some('"')) {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            c if c == SEP && !in_quotes => row.push(take(&mut field)),
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && matches!(chars.peek(), Some('\n')) {
                    chars.next();
                }
                row.push(take(&mut field));
                if row.len() == 1 && row[0].is_empty() {
                    row.clear();
                } else {
                    rows.push(take(&mut row));
                }
            }
            _ => field.push(ch),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

/* ---------------- Writing ---------------- */

fn needs_quotes(field: &str) -> bool {
    field.contains(SEP) || field.contains('"') || field.contains('\n') || field.contains('\r')
}

pub fn write_row<W: Write>(mut w: W, row: &[String]) -> io::Result<()> {
    for (index, cell) in row.iter().enumerate() {
        if index > 0 {
            write!(w, "{SEP}")?;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{cell}")?;
        }
    }
    writeln!(w)
}

/// A header row plus data rows, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Flattens records: base columns first, then every `tech_*` / `info_*`
    /// column in first-seen order. `provenance`, when given, must be parallel
    /// to `records` and adds the trailing `price_value` and `source_file`
    /// columns of a combined artifact.
    pub fn from_records(records: &[Record], provenance: Option<&[String]>) -> Self {
        let mut dynamic: IndexSet<String> = IndexSet::new();
        for record in records {
            for label in record.technical.keys() {
                dynamic.insert(format!("{TECH_PREFIX}{label}"));
            }
            for label in record.additional.keys() {
                dynamic.insert(format!("{INFO_PREFIX}{label}"));
            }
        }

        let mut headers: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
        headers.extend(dynamic.iter().cloned());
        if provenance.is_some() {
            headers.push(PRICE_VALUE.to_string());
            headers.push(SOURCE_FILE.to_string());
        }

        let rows = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let mut row = vec![
                    record.title.clone(),
                    record.price.clone(),
                    record.url.clone(),
                    record.collected_at.format(DATE_FORMAT).to_string(),
                ];
                row.extend(dynamic.iter().map(|column| lookup(record, column)));
                if let Some(sources) = provenance {
                    row.push(
                        record
                            .price_value()
                            .map(|value| value.to_string())
                            .unwrap_or_default(),
                    );
                    row.push(sources.get(index).cloned().unwrap_or_default());
                }
                row
            })
            .collect();

        Self { headers, rows }
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> io::Result<()> {
        write!(w, "{BOM}")?;
        write_row(&mut w, &self.headers)?;
        for row in &self.rows {
            write_row(&mut w, row)?;
        }
        Ok(())
    }

    pub fn parse(text: &str) -> Option<Self> {
        let mut rows = parse_rows(text);
        if rows.is_empty() {
            return None;
        }
        let headers = rows.remove(0);
        Some(Self { headers, rows })
    }

    pub fn into_records(self, origin: &str) -> CheckpointResult<Vec<Record>> {
        let column = |name: &str| self.headers.iter().position(|h| h == name);
        let url_col = column("url").ok_or_else(|| CheckpointError::Malformed {
            artifact: origin.to_string(),
            reason: "missing url column".to_string(),
        })?;
        let title_col = column("title");
        let price_col = column("price");
        let date_col = column("scrape_date");

        let mut records = Vec::with_capacity(self.rows.len());
        for (line, row) in self.rows.iter().enumerate() {
            let cell = |index: Option<usize>| {
                index
                    .and_then(|i| row.get(i))
                    .cloned()
                    .unwrap_or_default()
            };
            let url = cell(Some(url_col));
            let collected_at = match date_col.and_then(|i| row.get(i)) {
                Some(raw) => NaiveDateTime::parse_from_str(raw, DATE_FORMAT)
                    .map(|naive| Utc.from_utc_datetime(&naive))
                    .map_err(|err| CheckpointError::Malformed {
                        artifact: origin.to_string(),
                        reason: format!("row {}: bad scrape_date {raw:?}: {err}", line + 2),
                    })?,
                None => Utc::now(),
            };

            let mut technical = FieldGroup::new();
            let mut additional = FieldGroup::new();
            for (index, header) in self.headers.iter().enumerate() {
                let Some(value) = row.get(index).filter(|value| !value.is_empty()) else {
                    continue;
                };
                if let Some(label) = header.strip_prefix(TECH_PREFIX) {
                    technical.insert(label.to_string(), value.clone());
                } else if let Some(label) = header.strip_prefix(INFO_PREFIX) {
                    additional.insert(label.to_string(), value.clone());
                }
            }

            records.push(Record {
                identity_key: identity_key(&url),
                title: cell(title_col),
                price: cell(price_col),
                url,
                technical,
                additional,
                collected_at,
            });
        }
        Ok(records)
    }
}

fn lookup(record: &Record, column: &str) -> String {
    let value = if let Some(label) = column.strip_prefix(TECH_PREFIX) {
        record.technical.get(label)
    } else if let Some(label) = column.strip_prefix(INFO_PREFIX) {
        record.additional.get(label)
    } else {
        None
    };
    value.cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str, tech: &[(&str, &str)], info: &[(&str, &str)]) -> Record {
        let group = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<FieldGroup>()
        };
        Record {
            identity_key: identity_key(url),
            title: "Laptop, 15\" \"Pro\"".to_string(),
            price: "54,990".to_string(),
            url: url.to_string(),
            technical: group(tech),
            additional: group(info),
            collected_at: Utc.with_ymd_and_hms(2024, 3, 9, 10, 30, 0).unwrap(),
        }
    }

    #[test]
    fn parser_handles_quotes_crlf_and_bom() {
        let rows = parse_rows("\u{feff}a,\"b,c\",\"say \"\"hi\"\"\"\r\n1,\"two\nlines\",3\r\n");
        assert_eq!(
            rows,
            vec![
                vec!["a".to_string(), "b,c".to_string(), "say \"hi\"".to_string()],
                vec!["1".to_string(), "two\nlines".to_string(), "3".to_string()],
            ]
        );
    }

    #[test]
    fn columns_are_base_then_union_in_first_seen_order() {
        let records = vec![
            record("https://example.com/dp/1", &[("RAM", "16 GB")], &[("ASIN", "B01")]),
            record("https://example.com/dp/2", &[("CPU", "i7"), ("RAM", "8 GB")], &[]),
        ];
        let table = Table::from_records(&records, None);
        assert_eq!(
            table.headers,
            vec!["title", "price", "url", "scrape_date", "tech_RAM", "info_ASIN", "tech_CPU"]
        );
        assert_eq!(table.rows[1][5], "");
        assert_eq!(table.rows[1][6], "i7");
        assert_eq!(table.rows[0][3], "2024-03-09 10:30:00");
    }

    #[test]
    fn written_table_reads_back_with_groups() {
        let records = vec![record(
            "https://example.com/dp/1?ref=x",
            &[("Screen, size", "15.6 in")],
            &[("Weight", "1.8 kg")],
        )];
        let sources = vec!["a.csv".to_string()];
        let mut buf = Vec::new();
        Table::from_records(&records, Some(&sources))
            .write_to(&mut buf)
            .unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with('\u{feff}'));
        let header = text.lines().next().unwrap();
        assert!(header.ends_with(",price_value,source_file"));
        assert!(text.lines().nth(1).unwrap().ends_with(",54990,a.csv"));

        let parsed = Table::parse(&text).unwrap().into_records("a.csv").unwrap();
        assert_eq!(parsed, records);
    }

    #[test]
    fn missing_url_column_is_malformed() {
        let table = Table::parse("title,price\nx,1\n").unwrap();
        let err = table.into_records("broken.csv").unwrap_err();
        assert!(matches!(err, CheckpointError::Malformed { .. }));
    }
}
