//! Minimal XLSX writer for template sample sheets.
//!
//! Produces a single-sheet workbook using inline strings, so no shared
//! string table is needed. The header row is frozen and carries an
//! autoFilter; column widths follow the longest cell, clamped to
//! [`MIN_WIDTH`, `MAX_WIDTH`].

use std::io::{Seek, Write};

use anyhow::{Context, Result};
use arxiu_core::template::sample::SampleTable;
use quick_xml::escape::escape;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const MIN_WIDTH: usize = 10;
pub const MAX_WIDTH: usize = 40;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Model" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

/// Spreadsheet column name for a 0-based index (`0` → `A`, `26` → `AA`).
pub fn column_name(index: usize) -> String {
    let mut n = index + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Width of each column: the longest of its header and cells, clamped.
pub fn column_widths(table: &SampleTable) -> Vec<usize> {
    table
        .headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let longest = table
                .rows
                .iter()
                .filter_map(|r| r.get(i))
                .map(|c| c.chars().count())
                .max()
                .unwrap_or(0);
            h.chars().count().max(longest).clamp(MIN_WIDTH, MAX_WIDTH)
        })
        .collect()
}

fn cell(out: &mut String, col: usize, row: usize, value: &str) {
    out.push_str(&format!(
        r#"<c r="{}{}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
        column_name(col),
        row,
        escape(value)
    ));
}

/// Render the worksheet XML.
pub fn sheet_xml(table: &SampleTable) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
    );
    xml.push_str(
        r#"<sheetViews><sheetView workbookViewId="0"><pane ySplit="1" topLeftCell="A2" activePane="bottomLeft" state="frozen"/></sheetView></sheetViews>"#,
    );

    let widths = column_widths(table);
    if !widths.is_empty() {
        xml.push_str("<cols>");
        for (i, w) in widths.iter().enumerate() {
            xml.push_str(&format!(
                r#"<col min="{n}" max="{n}" width="{w}" customWidth="1"/>"#,
                n = i + 1,
                w = w
            ));
        }
        xml.push_str("</cols>");
    }

    xml.push_str("<sheetData>");
    xml.push_str(r#"<row r="1">"#);
    for (i, h) in table.headers.iter().enumerate() {
        cell(&mut xml, i, 1, h);
    }
    xml.push_str("</row>");
    for (r, values) in table.rows.iter().enumerate() {
        let line = r + 2;
        xml.push_str(&format!(r#"<row r="{}">"#, line));
        for (i, v) in values.iter().enumerate() {
            cell(&mut xml, i, line, v);
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData>");

    if !table.headers.is_empty() {
        xml.push_str(&format!(
            r#"<autoFilter ref="A1:{}1"/>"#,
            column_name(table.headers.len() - 1)
        ));
    }
    xml.push_str("</worksheet>");
    xml
}

/// Write `table` as a one-sheet workbook.
pub fn write_xlsx<W: Write + Seek>(table: &SampleTable, out: W) -> Result<()> {
    let mut zip = ZipWriter::new(out);
    let sheet = sheet_xml(table);
    let parts: [(&str, &str); 5] = [
        ("[Content_Types].xml", CONTENT_TYPES),
        ("_rels/.rels", ROOT_RELS),
        ("xl/workbook.xml", WORKBOOK),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
        ("xl/worksheets/sheet1.xml", &sheet),
    ];
    for (name, body) in parts {
        zip.start_file(name, SimpleFileOptions::default())
            .with_context(|| format!("Failed to add {} to workbook", name))?;
        zip.write_all(body.as_bytes())?;
    }
    zip.finish()?;
    Ok(())
}
