use crate::booklet::decorator::StampDecorator;
use crate::booklet::plan::{plan_booklet, BookletPlan, PageStamp};
use crate::config::StorageConfig;
use crate::db::journeys::JourneyQuestion;
use crate::db::Database;
use crate::error::{PipelineError, RenderError, Result};
use chrono::Utc;
use genpdf::elements::{Break, LinearLayout, Paragraph};
use genpdf::render::Area;
use genpdf::style::{Style, StyledString};
use genpdf::{Context, Document, Element, Mm, PaperSize, Position, RenderResult};
use log::{error, info};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const BODY_FONT_SIZE: u8 = 10;
const ANSWER_LINE_SPACING_MM: f64 = 8.0;

#[derive(Debug, Clone, Serialize)]
pub struct BookletOutput {
    pub path: PathBuf,
    pub pages: usize,
    pub participants: usize,
}

/// Plans, renders and writes the booklet PDF of a journey to
/// `<booklet_dir>/<journey_id>.pdf`.
pub fn compose_booklet(
    db: &Database,
    journey_id: Uuid,
    storage: &StorageConfig,
) -> Result<BookletOutput> {
    let conn = db.open()?;
    let plan = plan_booklet(&conn, journey_id)?;
    drop(conn);

    let bytes = render_booklet(&plan, &storage.fonts_dir).map_err(|e| {
        error!("Booklet rendering for journey {} failed: {}", journey_id, e);
        PipelineError::Render(e)
    })?;

    std::fs::create_dir_all(&storage.booklet_dir)?;
    let path = booklet_path(&storage.booklet_dir, journey_id);
    let partial = path.with_extension("pdf.partial");
    std::fs::write(&partial, &bytes)?;
    std::fs::rename(&partial, &path)?;

    info!(
        "Booklet for journey {} written to {} ({} pages)",
        journey_id,
        path.display(),
        plan.page_count()
    );
    Ok(BookletOutput {
        path,
        pages: plan.page_count(),
        participants: plan.booklets.len(),
    })
}

pub fn booklet_path(booklet_dir: &Path, journey_id: Uuid) -> PathBuf {
    booklet_dir.join(format!("{}.pdf", journey_id))
}

/// Renders the plan to PDF bytes. The page count of the result is checked
/// against the plan.
pub fn render_booklet(plan: &BookletPlan, fonts_dir: &Path) -> Result<Vec<u8>, RenderError> {
    let mut doc = configure_document(fonts_dir, &plan.journey.title)?;
    doc.set_page_decorator(StampDecorator::from_plan(plan)?);

    let printed = Utc::now().format("%Y-%m-%d").to_string();
    for booklet in &plan.booklets {
        for page in &booklet.pages {
            if page.payload.page_number == 1 {
                push_header(&mut doc, &plan.journey.title, &booklet.participant.full_name, &printed);
            }
            let question = plan
                .journey
                .questions
                .iter()
                .find(|q| q.id == page.slot.question_id)
                .ok_or_else(|| RenderError::Pdf("page slot names an unknown question".into()))?;
            push_question_page(&mut doc, question, page);
        }
    }

    let mut bytes = Vec::new();
    doc.render(&mut bytes)
        .map_err(|e| RenderError::Pdf(e.to_string()))?;

    let rendered = lopdf::Document::load_mem(&bytes)
        .map_err(|e| RenderError::Pdf(e.to_string()))?
        .get_pages()
        .len();
    if rendered != plan.page_count() {
        return Err(RenderError::PageCountMismatch {
            planned: plan.page_count(),
            rendered,
        });
    }
    Ok(bytes)
}

/// Families tried in order; each needs `-Regular`, `-Bold`, `-Italic` and
/// `-BoldItalic` TTFs in the fonts directory.
const FONT_FAMILIES: [&str; 3] = ["Arial", "LiberationSans", "DejaVuSans"];

fn load_font(
    fonts_dir: &Path,
) -> Result<genpdf::fonts::FontFamily<genpdf::fonts::FontData>, RenderError> {
    let mut last_error = None;
    for name in FONT_FAMILIES {
        match genpdf::fonts::from_files(fonts_dir, name, None) {
            Ok(family) => return Ok(family),
            Err(e) => last_error = Some(e),
        }
    }
    let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
    Err(RenderError::Pdf(format!("no usable font in {}: {}", fonts_dir.display(), reason)))
}

fn configure_document(fonts_dir: &Path, title: &str) -> Result<Document, RenderError> {
    let mut doc = Document::new(load_font(fonts_dir)?);
    doc.set_title(title);
    doc.set_paper_size(PaperSize::A4);
    doc.set_font_size(BODY_FONT_SIZE);
    doc.set_line_spacing(1.2);
    Ok(doc)
}

fn push_header(doc: &mut Document, title: &str, participant: &str, printed: &str) {
    doc.push(Paragraph::new(StyledString::new(
        title.to_string(),
        Style::new().bold().with_font_size(16),
    )));
    let mut who = Paragraph::new("");
    who.push(StyledString::new("Participant: ", Style::new().bold()));
    who.push(participant.to_string());
    doc.push(who);
    doc.push(Paragraph::new(format!("Printed: {}", printed)));
    doc.push(Break::new(1));
}

/// Heading and prompt on the first page of a question, a continuation heading
/// on the others, then ruled answer space down to the bottom margin.
fn push_question_page(doc: &mut Document, question: &JourneyQuestion, page: &PageStamp) {
    let slot = page.slot;
    let heading = if slot.part == 1 {
        format!("Question {}", slot.question_number)
    } else {
        format!(
            "Question {} (continued, page {} of {})",
            slot.question_number, slot.part, slot.parts
        )
    };
    doc.push(Paragraph::new(StyledString::new(
        heading,
        Style::new().bold().with_font_size(12),
    )));

    if slot.part == 1 {
        for line in question.prompt.lines() {
            if line.trim().is_empty() {
                doc.push(Break::new(1));
            } else if let Some(item) = line.strip_prefix("- ") {
                push_list_item(doc, item);
            } else {
                doc.push(styled_paragraph(line));
            }
        }
    }
    doc.push(Break::new(1));
    doc.push(AnswerLines::new(ANSWER_LINE_SPACING_MM));
}

fn push_list_item(doc: &mut Document, item: &str) {
    let mut p = Paragraph::new(StyledString::new("• ", Style::new()));
    push_segments(&mut p, item);
    let mut layout = LinearLayout::vertical();
    layout.push(p);
    doc.push(layout);
}

/// Paragraph from a prompt line with `***bold italic***`, `**bold**` and
/// `*italic*` markers. An unmatched marker is printed as is.
fn styled_paragraph(line: &str) -> Paragraph {
    let mut p = Paragraph::new("");
    push_segments(&mut p, line);
    p
}

fn push_segments(p: &mut Paragraph, line: &str) {
    for (text, style) in parse_styles(line) {
        p.push(StyledString::new(text, style));
    }
}

fn marker_style(marker: &str) -> Style {
    match marker {
        "***" => Style::new().bold().italic(),
        "**" => Style::new().bold(),
        _ => Style::new().italic(),
    }
}

fn parse_styles(line: &str) -> Vec<(String, Style)> {
    let mut segments = Vec::new();
    let mut rest = line;
    let mut plain = String::new();
    'outer: while !rest.is_empty() {
        for marker in ["***", "**", "*"] {
            if let Some(after) = rest.strip_prefix(marker) {
                if let Some(end) = after.find(marker).filter(|&end| end > 0) {
                    if !plain.is_empty() {
                        segments.push((std::mem::take(&mut plain), Style::new()));
                    }
                    segments.push((after[..end].to_string(), marker_style(marker)));
                    rest = &after[end + marker.len()..];
                    continue 'outer;
                }
            }
        }
        let next = rest
            .char_indices()
            .skip(1)
            .find(|&(_, c)| c == '*')
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        plain.push_str(&rest[..next]);
        rest = &rest[next..];
    }
    if !plain.is_empty() {
        segments.push((plain, Style::new()));
    }
    segments
}

/// Ruled lines over the whole remaining height of the page. Always reports
/// the full area as used, so the next element starts on a fresh page and the
/// answer space itself never spills.
struct AnswerLines {
    spacing_mm: f64,
}

impl AnswerLines {
    fn new(spacing_mm: f64) -> Self {
        Self { spacing_mm }
    }
}

impl Element for AnswerLines {
    fn render(
        &mut self,
        _context: &Context,
        area: Area<'_>,
        _style: Style,
    ) -> Result<RenderResult, genpdf::error::Error> {
        let size = area.size();
        let spacing = Mm::from(self.spacing_mm);
        let mut y = spacing;
        while y < size.height {
            area.draw_line(
                vec![Position::new(Mm::from(0.0), y), Position::new(size.width, y)],
                Style::new(),
            );
            y = y + spacing;
        }
        Ok(RenderResult {
            size,
            has_more: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(line: &str) -> Vec<String> {
        parse_styles(line).into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn inline_markers_split_segments() {
        assert_eq!(
            texts("Explain **why** a *short* password is ***never*** safe"),
            vec!["Explain ", "why", " a ", "short", " password is ", "never", " safe"]
        );
        let styles: Vec<Style> = parse_styles("**bold**").into_iter().map(|(_, s)| s).collect();
        assert_eq!(styles, vec![Style::new().bold()]);
    }

    #[test]
    fn unmatched_marker_stays_literal() {
        assert_eq!(texts("rate 5* service"), vec!["rate 5* service"]);
        assert_eq!(texts("**"), vec!["**"]);
    }
}
