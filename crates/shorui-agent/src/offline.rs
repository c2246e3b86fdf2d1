//! Deterministic offline generator
//!
//! Produces text in the same contract as the service: a fenced JSON block
//! with the filename, then a fenced Python block that builds the document.
//! Used whenever the service is not configured or does not answer usefully.

use async_trait::async_trait;
use shorui_core::filename::{slugify, DOCUMENT_EXTENSION};
use shorui_core::python::string_literal as py_str;

use crate::client::TextGenerator;
use crate::types::{RawModelResponse, ResponseSource};

const SUFFIX_LEN: usize = 6;

/// Template chosen by a case-insensitive substring match on the topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Template {
    BusinessProposal,
    ProjectReport,
    General,
}

impl Template {
    fn for_topic(topic: &str) -> Self {
        let topic = topic.to_lowercase();
        if topic.contains("business proposal") {
            Template::BusinessProposal
        } else if topic.contains("project report") {
            Template::ProjectReport
        } else {
            Template::General
        }
    }
}

/// Offline stand-in for the text-generation service
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineGenerator;

impl OfflineGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Render a response with a fresh random suffix
    pub fn render(&self, topic: &str) -> String {
        offline_response(topic, &random_suffix())
    }
}

#[async_trait]
impl TextGenerator for OfflineGenerator {
    async fn generate(&self, topic: &str) -> RawModelResponse {
        RawModelResponse::new(self.render(topic), ResponseSource::Offline)
    }
}

/// Six lower-case alphanumerics
fn random_suffix() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(SUFFIX_LEN)
        .collect()
}

/// `<slug>-doc-<suffix>.docx`
pub fn offline_filename(topic: &str, suffix: &str) -> String {
    format!("{}-doc-{}.{}", slugify(topic), suffix, DOCUMENT_EXTENSION)
}

/// Full response text for `topic` using a fixed `suffix`
pub fn offline_response(topic: &str, suffix: &str) -> String {
    let filename = offline_filename(topic, suffix);
    let header = serde_json::json!({ "filename": filename });
    let header = serde_json::to_string_pretty(&header).unwrap_or_else(|_| header.to_string());

    let code = match Template::for_topic(topic) {
        Template::BusinessProposal => business_proposal(&filename),
        Template::ProjectReport => project_report(&filename),
        Template::General => general_document(topic, &filename),
    };

    format!("```json\n{}\n```\n\n```python\n{}\n```\n", header, code)
}

fn business_proposal(filename: &str) -> String {
    format!(
        r#"from docx import Document
from docx.shared import Inches
from docx.enum.text import WD_ALIGN_PARAGRAPH

doc = Document()

title = doc.add_heading('Business Proposal', 0)
title.alignment = WD_ALIGN_PARAGRAPH.CENTER

doc.add_heading('Executive Summary', level=1)
doc.add_paragraph('This business proposal outlines a comprehensive strategy for market expansion and growth.')

doc.add_heading('Market Analysis', level=1)
doc.add_paragraph('Current market conditions show significant opportunities for growth in our target sector.')

doc.add_heading('Financial Projections', level=1)
table = doc.add_table(rows=4, cols=3)
hdr_cells = table.rows[0].cells
hdr_cells[0].text = 'Year'
hdr_cells[1].text = 'Revenue'
hdr_cells[2].text = 'Profit'

doc.add_heading('Next Steps', level=1)
doc.add_paragraph('Approve the proposal, confirm the budget and schedule the kickoff meeting.')

doc.save({})
print('Business proposal document generated successfully!')"#,
        py_str(filename)
    )
}

fn project_report(filename: &str) -> String {
    format!(
        r#"from docx import Document
from docx.shared import Inches

doc = Document()

doc.add_heading('Project Report', 0)

doc.add_heading('1. Introduction', level=1)
doc.add_paragraph('This report provides a comprehensive overview of the project objectives and outcomes.')

doc.add_heading('2. Methodology', level=1)
doc.add_paragraph('The project followed a structured approach with defined phases and milestones.')

doc.add_heading('3. Results', level=1)
doc.add_paragraph('Key findings and achievements are outlined in this section.')

doc.add_heading('4. Conclusion', level=1)
doc.add_paragraph('The project was completed successfully within the specified timeframe.')

doc.save({})
print('Project report generated successfully!')"#,
        py_str(filename)
    )
}

fn general_document(topic: &str, filename: &str) -> String {
    let title = py_str(topic);
    let about = py_str(&format!(
        "This document was automatically generated based on the topic: {}",
        topic
    ));
    format!(
        r#"from datetime import date
from docx import Document
from docx.enum.text import WD_ALIGN_PARAGRAPH

doc = Document()

title = doc.add_heading({title}, 0)
title.alignment = WD_ALIGN_PARAGRAPH.CENTER
doc.add_paragraph('Date: ' + date.today().strftime('%B %d, %Y'))

doc.add_heading('Introduction', level=1)
doc.add_paragraph({about})

doc.add_heading('Content', level=1)
doc.add_paragraph('Content goes here...')

doc.add_heading('Conclusion', level=1)
doc.add_paragraph('Review this draft and expand each section as needed.')

footer = doc.add_paragraph('Generated by Shorui AI Document Generator')
footer.alignment = WD_ALIGN_PARAGRAPH.CENTER

doc.save({save})
print('Document generated successfully!')"#,
        title = title,
        about = about,
        save = py_str(filename)
    )
}
