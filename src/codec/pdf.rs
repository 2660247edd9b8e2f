//! PDF report encoder (export only)
//!
//! Produces a plain-text report: a title block, then one section per data
//! type with a header line and one line per record, paginated onto US Letter
//! pages in a fixed-width base font. No font embedding, no compression.

use std::io::Write;

use chrono::Utc;

use super::RecordEncoder;
use crate::error::{ExchangeError, ExchangeResult};
use crate::models::{DataType, Record};

const PAGE_WIDTH: u32 = 612;
const PAGE_HEIGHT: u32 = 792;
const MARGIN_LEFT: u32 = 40;
const TOP_BASELINE: u32 = 752;
const FONT_SIZE: u32 = 9;
const LINE_HEIGHT: u32 = 12;
const LINES_PER_PAGE: usize = 58;
/// Characters that fit on a line at this font size
const MAX_LINE_CHARS: usize = 96;
const COLUMN_SEPARATOR: &str = " | ";

/// Buffered report writer
pub struct PdfEncoder<W: Write> {
    writer: W,
    lines: Vec<String>,
    section: Option<DataType>,
    section_count: u64,
}

impl<W: Write> PdfEncoder<W> {
    pub fn new(writer: W, data_types: &[DataType]) -> Self {
        let scope = data_types
            .iter()
            .map(DataType::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let lines = vec![
            "Financial records export".to_string(),
            format!("Generated {}", Utc::now().format("%Y-%m-%d %H:%M UTC")),
            format!("Contents: {}", scope),
        ];
        Self {
            writer,
            lines,
            section: None,
            section_count: 0,
        }
    }

    fn close_section(&mut self) {
        if self.section.take().is_some() {
            let count = self.section_count;
            self.lines.push(format!(
                "({} record{})",
                count,
                if count == 1 { "" } else { "s" }
            ));
        }
    }

    fn render(&self) -> Vec<u8> {
        let pages: Vec<&[String]> = self.lines.chunks(LINES_PER_PAGE).collect();
        let page_count = pages.len().max(1);

        let mut out: Vec<u8> = Vec::new();
        let mut offsets: Vec<usize> = Vec::new();
        out.extend_from_slice(b"%PDF-1.4\n");

        let mut push_object = |out: &mut Vec<u8>, number: usize, body: &[u8]| {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n", number).as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\nendobj\n");
        };

        push_object(&mut out, 1, b"<< /Type /Catalog /Pages 2 0 R >>");

        let kids = (0..page_count)
            .map(|i| format!("{} 0 R", 4 + 2 * i))
            .collect::<Vec<_>>()
            .join(" ");
        push_object(
            &mut out,
            2,
            format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids, page_count).as_bytes(),
        );
        push_object(
            &mut out,
            3,
            b"<< /Type /Font /Subtype /Type1 /BaseFont /Courier /Encoding /WinAnsiEncoding >>",
        );

        for i in 0..page_count {
            let page_lines: &[String] = pages.get(i).copied().unwrap_or(&[]);
            let page_obj = 4 + 2 * i;
            let content_obj = page_obj + 1;

            push_object(
                &mut out,
                page_obj,
                format!(
                    "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
                     /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
                    PAGE_WIDTH, PAGE_HEIGHT, content_obj
                )
                .as_bytes(),
            );

            let stream = page_stream(page_lines, i + 1, page_count);
            let mut body = format!("<< /Length {} >>\nstream\n", stream.len()).into_bytes();
            body.extend_from_slice(&stream);
            body.extend_from_slice(b"\nendstream");
            push_object(&mut out, content_obj, &body);
        }

        let xref_offset = out.len();
        let object_count = offsets.len();
        out.extend_from_slice(format!("xref\n0 {}\n", object_count + 1).as_bytes());
        out.extend_from_slice(b"0000000000 65535 f \n");
        for offset in &offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                object_count + 1,
                xref_offset
            )
            .as_bytes(),
        );
        out
    }
}

fn page_stream(lines: &[String], page: usize, page_count: usize) -> Vec<u8> {
    let mut stream = format!(
        "BT\n/F1 {} Tf\n{} TL\n{} {} Td\n",
        FONT_SIZE, LINE_HEIGHT, MARGIN_LEFT, TOP_BASELINE
    );
    for line in lines {
        stream.push_str(&format!("({}) Tj T*\n", escape_text(line)));
    }
    stream.push_str("ET\n");
    stream.push_str(&format!(
        "BT\n/F1 {} Tf\n{} 24 Td\n(Page {} of {}) Tj\nET",
        FONT_SIZE,
        PAGE_WIDTH / 2 - 30,
        page,
        page_count
    ));
    stream.into_bytes()
}

/// Escape a line for a PDF literal string. Non-ASCII becomes '?'.
fn escape_text(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for c in line.chars().take(MAX_LINE_CHARS) {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

impl<W: Write + Send> RecordEncoder<W> for PdfEncoder<W> {
    fn begin_section(&mut self, data_type: DataType) -> ExchangeResult<()> {
        self.close_section();
        self.lines.push(String::new());
        self.lines.push(data_type.as_str().to_uppercase());
        let mut header = data_type.columns().join(COLUMN_SEPARATOR);
        if data_type == DataType::Goals {
            header.push_str(COLUMN_SEPARATOR);
            header.push_str("progress");
        }
        self.lines.push(header);
        self.section = Some(data_type);
        self.section_count = 0;
        Ok(())
    }

    fn write_record(&mut self, record: &Record) -> ExchangeResult<()> {
        if self.section != Some(record.data_type()) {
            return Err(ExchangeError::Codec(format!(
                "{} record written outside its section",
                record.data_type()
            )));
        }
        let mut line = record
            .cells()
            .iter()
            .map(|cell| cell.to_text())
            .collect::<Vec<_>>()
            .join(COLUMN_SEPARATOR);
        if let Record::Goal(goal) = record {
            line.push_str(&format!("{}{}%", COLUMN_SEPARATOR, goal.percent_complete()));
        }
        self.lines.push(line);
        self.section_count += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> ExchangeResult<W> {
        self.close_section();
        let bytes = self.render();
        self.writer.write_all(&bytes)?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryKind, CategoryRecord};

    fn report(records: usize) -> Vec<u8> {
        let mut encoder: Box<dyn RecordEncoder<Vec<u8>>> =
            Box::new(PdfEncoder::new(Vec::new(), &[DataType::Categories]));
        encoder.begin_section(DataType::Categories).unwrap();
        for i in 0..records {
            let category = CategoryRecord::new(format!("Category (#{})", i), CategoryKind::Expense);
            encoder.write_record(&Record::Category(category)).unwrap();
        }
        encoder.finish().unwrap()
    }

    #[test]
    fn test_document_structure() {
        let bytes = report(3);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("%PDF-1.4\n"));
        assert!(text.trim_end().ends_with("%%EOF"));
        assert!(text.contains("/Count 1"));
        assert!(text.contains("Category \\(#2\\)"));
        assert!(text.contains("(3 records)"));
    }

    #[test]
    fn test_paginates_long_reports() {
        let bytes = report(150);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("/Count 3"));
        assert!(text.contains("Page 3 of 3"));
    }

    #[test]
    fn test_xref_offsets_point_at_objects() {
        let bytes = report(1);
        let text = String::from_utf8_lossy(&bytes).to_string();
        let xref_at = text.find("xref\n").unwrap();
        let entries: Vec<usize> = text[xref_at..]
            .lines()
            .skip(3)
            .take_while(|line| line.ends_with(" n "))
            .map(|line| line[..10].parse().unwrap())
            .collect();
        assert_eq!(entries.len(), 5);
        for (i, offset) in entries.iter().enumerate() {
            assert!(text[*offset..].starts_with(&format!("{} 0 obj", i + 1)));
        }
    }

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text("a(b)\\c"), "a\\(b\\)\\\\c");
        assert_eq!(escape_text("café"), "caf?");
    }
}
