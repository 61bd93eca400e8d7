//! Tiny layout engine over printpdf's builtin fonts: cursor-based flow,
//! automatic page breaks, footer stamped on every page once the count is
//! known.

use std::io::BufWriter;

use printpdf::{
    BuiltinFont, Color, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerIndex,
    PdfLayerReference, PdfPageIndex, Rgb,
};

use crate::ExportError;

const PAGE_W: f32 = 210.0;
const PAGE_H: f32 = 297.0;
const MARGIN: f32 = 14.0;
/// Footer baseline, from the bottom edge.
const FOOTER_Y: f32 = 10.0;
const LINE_GAP: f32 = 1.8;
const PT_TO_MM: f32 = 0.352_778;

/// Helvetica has no embedded metrics we can reach here; half an em per
/// character is close enough for centering and wrap widths.
fn approx_width(text: &str, pt: f32) -> f32 {
    text.chars().count() as f32 * pt * 0.5 * PT_TO_MM
}

fn line_height(pt: f32) -> f32 {
    pt * PT_TO_MM + LINE_GAP
}

fn navy() -> Color {
    Color::Rgb(Rgb::new(33.0 / 255.0, 58.0 / 255.0, 138.0 / 255.0, None))
}

fn gray() -> Color {
    Color::Rgb(Rgb::new(100.0 / 255.0, 100.0 / 255.0, 100.0 / 255.0, None))
}

fn black() -> Color {
    Color::Rgb(Rgb::new(0.0, 0.0, 0.0, None))
}

pub(crate) struct ReportDoc {
    doc: PdfDocumentReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    pages: Vec<(PdfPageIndex, PdfLayerIndex)>,
    /// Flow cursor, in mm from the top of the current page.
    cursor: f32,
}

impl ReportDoc {
    pub(crate) fn new(title: &str) -> Result<Self, ExportError> {
        let (doc, page, layer) = PdfDocument::new(title, Mm(PAGE_W), Mm(PAGE_H), "content");
        let regular = doc.add_builtin_font(BuiltinFont::Helvetica)?;
        let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold)?;
        Ok(Self { doc, regular, bold, pages: vec![(page, layer)], cursor: MARGIN })
    }

    fn layer(&self) -> PdfLayerReference {
        let (page, layer) = self.pages[self.pages.len() - 1];
        self.doc.get_page(page).get_layer(layer)
    }

    fn font(&self, bold: bool) -> &IndirectFontRef {
        if bold {
            &self.bold
        } else {
            &self.regular
        }
    }

    fn ensure_room(&mut self, need: f32) {
        if self.cursor + need > PAGE_H - FOOTER_Y - 8.0 {
            let (page, layer) = self.doc.add_page(Mm(PAGE_W), Mm(PAGE_H), "content");
            self.pages.push((page, layer));
            self.cursor = MARGIN;
        }
    }

    pub(crate) fn gap(&mut self, mm: f32) {
        self.cursor += mm;
    }

    /// Centered document title in the house navy.
    pub(crate) fn title(&mut self, text: &str) {
        let pt = 20.0;
        self.ensure_room(line_height(pt));
        let x = (PAGE_W - approx_width(text, pt)).max(0.0) / 2.0;
        let layer = self.layer();
        layer.set_fill_color(navy());
        layer.use_text(text, pt, Mm(x), Mm(PAGE_H - self.cursor), &self.bold);
        layer.set_fill_color(black());
        self.cursor += line_height(pt);
    }

    pub(crate) fn heading(&mut self, text: &str) {
        self.text_line(text, 14.0, true);
    }

    pub(crate) fn line(&mut self, text: &str) {
        self.text_line(text, 12.0, false);
    }

    pub(crate) fn text_line(&mut self, text: &str, pt: f32, bold: bool) {
        self.ensure_room(line_height(pt));
        let layer = self.layer();
        layer.set_fill_color(black());
        layer.use_text(text, pt, Mm(MARGIN), Mm(PAGE_H - self.cursor), self.font(bold));
        self.cursor += line_height(pt);
    }

    /// One table row at fixed column offsets. Cells render on a single line;
    /// callers truncate long cells beforehand.
    fn row(&mut self, cells: &[String], widths_mm: &[f32], pt: f32, bold: bool) {
        self.ensure_room(line_height(pt));
        let layer = self.layer();
        layer.set_fill_color(if bold { navy() } else { black() });
        let mut x = MARGIN;
        for (cell, width) in cells.iter().zip(widths_mm) {
            layer.use_text(cell, pt, Mm(x), Mm(PAGE_H - self.cursor), self.font(bold));
            x += width;
        }
        layer.set_fill_color(black());
        self.cursor += line_height(pt);
    }

    pub(crate) fn table(&mut self, headers: &[&str], widths_mm: &[f32], rows: &[Vec<String>]) {
        let header_cells: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
        self.row(&header_cells, widths_mm, 11.0, true);
        self.gap(1.0);
        for cells in rows {
            self.row(cells, widths_mm, 11.0, false);
        }
    }

    pub(crate) fn paragraph(&mut self, text: &str, wrap_chars: usize) {
        for line in wrap_text(text, wrap_chars) {
            self.text_line(&line, 11.0, false);
        }
    }

    /// Stamp the repeated footer on every page and serialize the document.
    pub(crate) fn finish(self, footer_prefix: &str) -> Result<Vec<u8>, ExportError> {
        let total = self.pages.len();
        for (i, (page, layer)) in self.pages.iter().enumerate() {
            let text = format!("{} - Page {} of {}", footer_prefix, i + 1, total);
            let x = (PAGE_W - approx_width(&text, 10.0)).max(0.0) / 2.0;
            let l = self.doc.get_page(*page).get_layer(*layer);
            l.set_fill_color(gray());
            l.use_text(text, 10.0, Mm(x), Mm(FOOTER_Y), &self.regular);
        }
        let mut writer = BufWriter::new(Vec::new());
        self.doc.save(&mut writer)?;
        writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))
    }
}

/// Greedy word wrap on character count. Words longer than the width are
/// hard-split; blank input lines survive as paragraph breaks.
pub(crate) fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    for raw in text.lines() {
        if raw.trim().is_empty() {
            lines.push(String::new());
            continue;
        }
        let mut line = String::new();
        for word in raw.split_whitespace() {
            let wlen = word.chars().count();
            if wlen > max_chars {
                if !line.is_empty() {
                    lines.push(std::mem::take(&mut line));
                }
                let mut rest: Vec<char> = word.chars().collect();
                while rest.len() > max_chars {
                    lines.push(rest.drain(..max_chars).collect());
                }
                line = rest.into_iter().collect();
                continue;
            }
            let need = if line.is_empty() { wlen } else { line.chars().count() + 1 + wlen };
            if need <= max_chars {
                if !line.is_empty() {
                    line.push(' ');
                }
                line.push_str(word);
            } else {
                lines.push(std::mem::take(&mut line));
                line.push_str(word);
            }
        }
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

/// Cell preview for the bulk table: at most `max` characters plus an
/// ellipsis when anything was cut.
pub(crate) fn truncate_preview(text: &str, max: usize) -> String {
    let mut out: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        out.push_str("...");
    }
    out
}
