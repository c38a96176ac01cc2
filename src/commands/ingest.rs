//! Ingest a local file into the knowledge graph.
//!
//! The file kind follows its extension: `.csv` rows, `.pdf` and images through
//! OCR, anything else as one item per non-blank line.

use std::path::{Path, PathBuf};

use tracing::info;

use super::open_store;
use crate::api::{DataType, IngestPrompts};
use crate::config::Config;
use crate::integrations::mistral::{image_mime_type, IMAGE_EXTENSIONS};
use crate::integrations::{MistralOcrClient, OcrDocument};
use crate::knowledge::{split_paragraphs, CognifyReport};
use crate::records::{csv_rows_as_items, delimiter_byte};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct IngestArgs {
    pub file: PathBuf,
    pub data_type: String,
    pub delimiter: Option<String>,
    pub max_rows: usize,
    pub custom_prompt: Option<String>,
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

fn ocr_client(config: &Config) -> Result<MistralOcrClient> {
    let key = config.mistral_api_key.clone().ok_or_else(|| {
        Error::ConfigError(
            "MISTRAL_API_KEY environment variable not set. Please set it to use OCR.".to_string(),
        )
    })?;
    MistralOcrClient::new(
        key,
        &config.mistral_base_url,
        &config.ocr_model,
        std::time::Duration::from_secs(config.ocr_timeout_secs),
    )
}

/// Items to queue for one file.
pub async fn read_items(
    config: &Config,
    args: &IngestArgs,
    data_type: DataType,
) -> Result<Vec<String>> {
    if !args.file.exists() {
        return Err(Error::NotFound(format!("File not found: {}", args.file.display())));
    }
    let bytes = tokio::fs::read(&args.file).await?;
    let ext = extension(&args.file);

    let items = match ext.as_str() {
        ".csv" => {
            let delimiter = match (args.delimiter.as_deref(), data_type) {
                (Some(d), _) => d,
                (None, DataType::Transaction) => ";",
                (None, DataType::Invoice) => ",",
            };
            csv_rows_as_items(&bytes, delimiter_byte(delimiter)?, args.max_rows)?
        }
        ".pdf" => {
            let text = ocr_client(config)?.extract_text(&OcrDocument::pdf(&bytes)).await?;
            split_paragraphs(&text)
        }
        ext if IMAGE_EXTENSIONS.contains(&ext) => {
            let text = ocr_client(config)?
                .extract_text(&OcrDocument::image(&bytes, image_mime_type(ext)))
                .await?;
            let chunks = split_paragraphs(&text);
            if chunks.is_empty() && !text.trim().is_empty() {
                vec![text.trim().to_string()]
            } else {
                chunks
            }
        }
        _ => String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
    };

    if items.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "No processable text content found in {}",
            args.file.display()
        )));
    }
    Ok(items)
}

pub async fn run(config: &Config, args: IngestArgs) -> Result<CognifyReport> {
    let data_type: DataType = args.data_type.parse().map_err(Error::InvalidArgument)?;
    let items = read_items(config, &args, data_type).await?;
    let prompts = IngestPrompts::load(&config.prompts_dir)?;
    let prompt = prompts.select(data_type, args.custom_prompt.as_deref());

    let store = open_store(config)?;
    info!(items = items.len(), file = %args.file.display(), "Ingesting");
    let report = store.ingest(items, data_type.as_str(), Some(prompt)).await?;
    println!(
        "Successfully ingested {} {} items ({} chunks, {} new nodes, {} new edges)",
        report.items, args.data_type, report.chunks, report.nodes_added, report.edges_added
    );
    Ok(report)
}
