//! Instruction text sent to the text-generation service

/// Fixed system instruction describing the response contract
pub const SYSTEM_PROMPT: &str = r#"You are a professional document generator. Create Python code using the python-docx library that generates a comprehensive, well-structured document based on the given topic.

Your response must be in this exact format:
{"filename": "topic-name-doc-123456.docx"}

```python
from docx import Document
from docx.shared import Inches
from docx.enum.text import WD_ALIGN_PARAGRAPH

# Your Python code here to create a professional document
# Include proper headings, paragraphs, tables if relevant
# Make it comprehensive and professional
doc.save('topic-name-doc-123456.docx')
```

Do not include any explanatory text, just the JSON and Python code."#;

pub fn build_user_prompt(topic: &str) -> String {
    format!("Generate a professional document about: {}", topic)
}
