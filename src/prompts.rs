//! Prompt templates loaded from files.
//!
//! Prompts live in the `prompts/` directory at the project root. Templates use
//! `{{ name }}` placeholders.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{Error, Result};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid placeholder regex")
});

/// Available prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Graph extraction instructions for invoices.
    InvoiceIngest,
    /// Graph extraction instructions for bank transactions.
    TransactionIngest,
    /// System prompt for financial Q&A.
    System,
    /// User prompt template (`{{ question }}`, `{{ context }}`).
    User,
    /// Compresses retrieved context for the conversation history.
    SummarizeContext,
}

impl Prompt {
    /// Prompt file name.
    pub fn filename(&self) -> &'static str {
        match self {
            Prompt::InvoiceIngest => "invoice_prompt.txt",
            Prompt::TransactionIngest => "transaction_prompt.txt",
            Prompt::System => "system_prompt.txt",
            Prompt::User => "user_prompt.txt",
            Prompt::SummarizeContext => "summarize_context.txt",
        }
    }

    /// Load the prompt from a prompts directory.
    pub fn load_from(&self, dir: &Path) -> Result<String> {
        load_prompt(dir, self.filename())
    }
}

/// Load a prompt by file name.
pub fn load_prompt(dir: &Path, filename: &str) -> Result<String> {
    let path = dir.join(filename);
    if !path.exists() {
        return Err(Error::NotFound(format!(
            "Prompt file not found: {}",
            path.display()
        )));
    }
    Ok(std::fs::read_to_string(&path)?)
}

/// Substitute `{{ name }}` placeholders. Unknown names render as empty strings.
pub fn render_prompt(template: &str, vars: &HashMap<&str, &str>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            vars.get(&caps[1]).copied().unwrap_or_default().to_string()
        })
        .into_owned()
}

/// Path to the prompts directory.
pub fn prompts_dir() -> PathBuf {
    let candidates = [
        PathBuf::from("prompts"),
        PathBuf::from("../prompts"),
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("prompts"),
    ];

    for path in candidates {
        if path.exists() {
            return path;
        }
    }

    PathBuf::from("prompts")
}

/// All known prompts.
pub fn list_prompts() -> Vec<Prompt> {
    vec![
        Prompt::InvoiceIngest,
        Prompt::TransactionIngest,
        Prompt::System,
        Prompt::User,
        Prompt::SummarizeContext,
    ]
}
