//! Prescription document rendering.
//!
//! `layout` turns a record into a flat list of blocks; `render_pdf` draws
//! those blocks onto A4 pages with the builtin Helvetica faces.

use std::io::BufWriter;

use healthmate_core::{DocumentError, PrescriptionRecord};
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference};

pub const DOCUMENT_TITLE: &str = "Prescription Details";
pub const DOCTOR_NAME: &str = "Healthmate";

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const TOP: f32 = 280.0;
const BOTTOM_MARGIN: f32 = 20.0;
const LEFT: f32 = 20.0;
const INDENT: f32 = 25.0;
const WRAP_CHARS: usize = 85;

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Title(String),
    Field { label: String, value: String },
    Heading(String),
    /// May be empty; an empty list still occupies its region.
    BulletList(Vec<String>),
    Paragraph(String),
}

pub fn layout(record: &PrescriptionRecord) -> Vec<Block> {
    vec![
        Block::Title(DOCUMENT_TITLE.to_string()),
        Block::Field {
            label: "Username".into(),
            value: record.username.clone(),
        },
        Block::Field {
            label: "Health Issue".into(),
            value: record.health_issue.clone(),
        },
        Block::Heading("Symptoms:".into()),
        Block::BulletList(record.symptoms.clone()),
        Block::Heading("Medicines Prescribed:".into()),
        Block::BulletList(
            record
                .medicines_prescribed
                .iter()
                .map(ToString::to_string)
                .collect(),
        ),
        Block::Heading("Lifestyle Advice:".into()),
        Block::Paragraph(record.lifestyle_advice.as_paragraph().into_owned()),
        Block::Field {
            label: "Doctor".into(),
            value: DOCTOR_NAME.to_string(),
        },
    ]
}

/// Writes lines top-down and opens a fresh page past the bottom margin.
struct PageCursor<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    y: f32,
    pages: usize,
}

impl<'a> PageCursor<'a> {
    fn line(&mut self, text: &str, size: f32, x: f32, advance: f32, font: &IndirectFontRef) {
        if self.y < BOTTOM_MARGIN {
            let (page, layer) = self.doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = TOP;
            self.pages += 1;
        }
        self.layer.use_text(text, size, Mm(x), Mm(self.y), font);
        self.y -= advance;
    }

    fn gap(&mut self, mm: f32) {
        self.y -= mm;
    }
}

pub fn render_pdf(record: &PrescriptionRecord) -> Result<Vec<u8>, DocumentError> {
    let (doc, page1, layer1) = PdfDocument::new(DOCUMENT_TITLE, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| DocumentError::Render(format!("PDF font error: {e}")))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| DocumentError::Render(format!("PDF font error: {e}")))?;

    let pages = {
        let mut cursor = PageCursor {
            doc: &doc,
            layer: doc.get_page(page1).get_layer(layer1),
            y: TOP,
            pages: 1,
        };

        for block in layout(record) {
            match block {
                Block::Title(title) => {
                    cursor.line(&title, 16.0, LEFT, 12.0, &bold);
                }
                Block::Field { label, value } => {
                    let text = format!("{}: {}", label, value);
                    for line in wrap_text(&text, WRAP_CHARS) {
                        cursor.line(&line, 11.0, LEFT, 6.0, &font);
                    }
                    cursor.gap(2.0);
                }
                Block::Heading(heading) => {
                    cursor.gap(2.0);
                    cursor.line(&heading, 12.0, LEFT, 7.0, &bold);
                }
                Block::BulletList(items) => {
                    for item in &items {
                        let mut first = true;
                        for line in wrap_text(item, WRAP_CHARS - 4) {
                            let text = if first { format!("- {}", line) } else { format!("  {}", line) };
                            first = false;
                            cursor.line(&text, 10.0, INDENT, 5.0, &font);
                        }
                    }
                    if items.is_empty() {
                        cursor.gap(5.0);
                    }
                    cursor.gap(2.0);
                }
                Block::Paragraph(text) => {
                    for line in wrap_text(&text, WRAP_CHARS) {
                        cursor.line(&line, 10.0, INDENT, 5.0, &font);
                    }
                    cursor.gap(4.0);
                }
            }
        }
        cursor.pages
    };

    tracing::debug!(username = %record.username, pages, "Rendered prescription document");

    let mut buf = BufWriter::new(Vec::new());
    doc.save(&mut buf)
        .map_err(|e| DocumentError::Render(format!("PDF save error: {e}")))?;
    buf.into_inner()
        .map_err(|e| DocumentError::Render(format!("PDF buffer error: {e}")))
}

fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + word.chars().count() + 1 > max_chars {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthmate_core::{LifestyleAdvice, MedicineEntry};

    fn record() -> PrescriptionRecord {
        PrescriptionRecord {
            username: "alice".into(),
            health_issue: "Common cold".into(),
            symptoms: vec!["runny nose".into(), "sneezing".into()],
            medicines_prescribed: vec![MedicineEntry::from("Paracetamol 500mg")],
            lifestyle_advice: LifestyleAdvice::Items(vec!["Rest".into(), "Hydrate".into()]),
            updated_at: None,
        }
    }

    #[test]
    fn test_layout_order_and_advice_paragraph() {
        let blocks = layout(&record());
        assert_eq!(blocks[0], Block::Title("Prescription Details".into()));
        assert_eq!(
            blocks[1],
            Block::Field {
                label: "Username".into(),
                value: "alice".into()
            }
        );
        assert_eq!(blocks[3], Block::Heading("Symptoms:".into()));
        assert_eq!(
            blocks[4],
            Block::BulletList(vec!["runny nose".into(), "sneezing".into()])
        );
        assert_eq!(blocks[8], Block::Paragraph("Rest Hydrate".into()));
        assert_eq!(
            blocks.last(),
            Some(&Block::Field {
                label: "Doctor".into(),
                value: "Healthmate".into()
            })
        );
    }

    #[test]
    fn test_layout_does_not_touch_stored_advice() {
        let record = record();
        let _ = layout(&record);
        assert_eq!(
            record.lifestyle_advice,
            LifestyleAdvice::Items(vec!["Rest".into(), "Hydrate".into()])
        );
    }

    #[test]
    fn test_empty_lists_still_get_their_region() {
        let record = PrescriptionRecord::fallback("bob");
        let blocks = layout(&record);
        assert_eq!(blocks[4], Block::BulletList(vec![]));
        assert_eq!(blocks[5], Block::Heading("Medicines Prescribed:".into()));
        assert_eq!(blocks[6], Block::BulletList(vec![]));

        let pdf = render_pdf(&record).unwrap();
        assert!(pdf.starts_with(b"%PDF"));
    }

    #[test]
    fn test_render_produces_pdf_and_paginates() {
        let mut long = record();
        long.symptoms = (0..120).map(|i| format!("symptom number {}", i)).collect();
        let pdf = render_pdf(&long).unwrap();
        assert!(pdf.starts_with(b"%PDF"));
        assert!(pdf.len() > render_pdf(&record()).unwrap().len());
    }

    #[test]
    fn test_wrap_text_breaks_on_words() {
        let lines = wrap_text("alpha beta gamma delta", 11);
        assert_eq!(lines, vec!["alpha beta", "gamma delta"]);
        assert_eq!(wrap_text("", 10), vec![String::new()]);
    }
}
