//! Native HTML → Word conversion.
//!
//! The rendered HTML is walked depth-first into a small paragraph/run model
//! which is then written out with `docx-rs`:
//!
//! * `<p>` opens a paragraph; `text-indent: Nem` becomes a first-line indent
//!   of `N × 12pt × 20` twips.
//! * `<span>` opens a run; a `data-style-id` present in the font-size map sets
//!   the run size to `pt × 2` half-points.
//! * text outside a span becomes a default-formatted run.
//! * every other element is transparent.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::OnceLock;

use async_trait::async_trait;
use docx_rs::{Docx, Paragraph, Run, SpecialIndentType};
use regex::Regex;
use scraper::{ElementRef, Html};

use super::{DocumentRenderer, RenderError, RenderInput, RenderedFile, DOCX_CONTENT_TYPE};

const BASE_FONT_PT: f64 = 12.0;
const TWIPS_PER_PT: f64 = 20.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WordRun {
    pub text: String,
    /// Half-points; `None` keeps the document default.
    pub size: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WordParagraph {
    /// Twips.
    pub first_line_indent: Option<i32>,
    pub runs: Vec<WordRun>,
}

impl WordParagraph {
    pub fn text(&self) -> String {
        self.runs.iter().map(|run| run.text.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WordDocument {
    pub paragraphs: Vec<WordParagraph>,
}

impl WordDocument {
    pub fn to_docx(&self) -> Docx {
        self.paragraphs
            .iter()
            .fold(Docx::new(), |docx, paragraph| {
                docx.add_paragraph(build_paragraph(paragraph))
            })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RenderError> {
        let mut cursor = Cursor::new(Vec::new());
        self.to_docx()
            .build()
            .pack(&mut cursor)
            .map_err(|err| RenderError::Encoding(err.to_string()))?;
        Ok(cursor.into_inner())
    }
}

fn build_paragraph(source: &WordParagraph) -> Paragraph {
    let mut paragraph = Paragraph::new();
    if let Some(twips) = source.first_line_indent {
        paragraph = paragraph.indent(None, Some(SpecialIndentType::FirstLine(twips)), None, None);
    }
    for run in &source.runs {
        let mut built = Run::new().add_text(run.text.as_str());
        if let Some(size) = run.size {
            built = built.size(size);
        }
        paragraph = paragraph.add_run(built);
    }
    paragraph
}

fn text_indent_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"text-indent:\s*([\d.]+)em").expect("valid indent regex"))
}

/// First-line indent in twips for an inline `style` attribute.
pub fn parse_indent(style: &str) -> Option<i32> {
    let em: f64 = text_indent_pattern()
        .captures(style)?
        .get(1)?
        .as_str()
        .parse()
        .ok()?;
    let twips = (em * BASE_FONT_PT * TWIPS_PER_PT) as i32;
    (twips > 0).then_some(twips)
}

pub fn html_to_word(html: &str, font_sizes: &HashMap<String, f64>) -> WordDocument {
    let fragment = Html::parse_fragment(html);
    let mut converter = Converter {
        font_sizes,
        paragraphs: Vec::new(),
    };
    converter.walk_children(fragment.root_element(), None);
    WordDocument {
        paragraphs: converter.paragraphs,
    }
}

struct Converter<'a> {
    font_sizes: &'a HashMap<String, f64>,
    paragraphs: Vec<WordParagraph>,
}

impl Converter<'_> {
    fn walk_children(&mut self, element: ElementRef<'_>, paragraph: Option<usize>) {
        for child in element.children() {
            if let Some(child_element) = ElementRef::wrap(child) {
                self.visit_element(child_element, paragraph);
            } else if let Some(text) = child.value().as_text() {
                self.push_text(text, paragraph);
            }
        }
    }

    fn visit_element(&mut self, element: ElementRef<'_>, paragraph: Option<usize>) {
        match element.value().name() {
            "p" => {
                let indent = element.value().attr("style").and_then(parse_indent);
                let index = self.open_paragraph(indent);
                self.walk_children(element, Some(index));
            }
            "span" => self.visit_span(element, paragraph),
            _ => self.walk_children(element, paragraph),
        }
    }

    fn visit_span(&mut self, span: ElementRef<'_>, paragraph: Option<usize>) {
        let paragraph = match paragraph {
            Some(index) => index,
            None => self.open_paragraph(None),
        };
        let size = self.run_size(span.value().attr("data-style-id"));
        let runs = &mut self.paragraphs[paragraph].runs;
        runs.push(WordRun {
            text: String::new(),
            size,
        });
        let run = runs.len() - 1;

        for child in span.children() {
            if let Some(text) = child.value().as_text() {
                self.paragraphs[paragraph].runs[run].text.push_str(text);
            } else if let Some(child_element) = ElementRef::wrap(child) {
                self.visit_element(child_element, Some(paragraph));
            }
        }
    }

    fn run_size(&self, style_id: Option<&str>) -> Option<usize> {
        let Some(style_id) = style_id else {
            tracing::debug!("span without data-style-id");
            return None;
        };
        match self.font_sizes.get(style_id) {
            Some(pt) if *pt > 0.0 => Some((pt * 2.0).round() as usize),
            _ => {
                tracing::debug!(style_id, "no font size for style id");
                None
            }
        }
    }

    fn push_text(&mut self, text: &str, paragraph: Option<usize>) {
        if text.is_empty() {
            return;
        }
        let index = match paragraph {
            Some(index) => index,
            None if text.trim().is_empty() => return,
            None => self.open_paragraph(None),
        };
        self.paragraphs[index].runs.push(WordRun {
            text: text.to_string(),
            size: None,
        });
    }

    fn open_paragraph(&mut self, first_line_indent: Option<i32>) -> usize {
        self.paragraphs.push(WordParagraph {
            first_line_indent,
            runs: Vec::new(),
        });
        self.paragraphs.len() - 1
    }
}

/// Renders through the tree walk and optionally keeps a copy on disk.
pub struct NativeDocxRenderer {
    export_dir: Option<PathBuf>,
}

impl NativeDocxRenderer {
    pub fn new(export_dir: Option<PathBuf>) -> Self {
        Self { export_dir }
    }
}

#[async_trait]
impl DocumentRenderer for NativeDocxRenderer {
    async fn render(&self, input: RenderInput) -> Result<RenderedFile, RenderError> {
        let document = html_to_word(&input.html, &input.font_sizes);
        let bytes = document.to_bytes()?;
        let file_name = format!("{}.docx", input.file_stem);

        if let Some(dir) = &self.export_dir {
            tokio::fs::create_dir_all(dir).await?;
            let path = dir.join(&file_name);
            tokio::fs::write(&path, &bytes).await?;
            tracing::info!(path = %path.display(), paragraphs = document.paragraphs.len(), "saved word export");
        }

        Ok(RenderedFile {
            file_name,
            content_type: DOCX_CONTENT_TYPE.to_string(),
            bytes,
        })
    }
}
