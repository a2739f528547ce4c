use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::ads::{fetch_ads, AdsClient, TextAd};
use crate::auth::TokenProvider;
use crate::http::Transport;
use crate::images::{encode_base64, ImageSource};
use crate::sheet::{
    cell_text, Cell, Row, TableStore, ADS_SHEET, GUIDELINES_SHEET, HEADER_ROWS,
    IMAGE_GUIDELINES_SHEET, IMAGE_VALIDATION_SHEET, VALIDATION_SHEET,
};
use crate::validator::{image_prompt, text_ad_prompt, Judge, Verdict};

const PREVIEW_ROW_HEIGHT: u32 = 120;
const ERROR_MARKER: &str = "ERROR";

/// Counts reported after a validation run.
#[derive(Debug, Default, PartialEq)]
pub struct ValidationSummary {
    pub checked: usize,
    pub valid: usize,
    pub invalid: usize,
    pub errors: usize,
}

impl ValidationSummary {
    fn record(&mut self, verdict: Option<&Verdict>) {
        self.checked += 1;
        match verdict {
            Some(v) if v.is_valid => self.valid += 1,
            Some(_) => self.invalid += 1,
            None => self.errors += 1,
        }
    }

    pub fn print(&self) {
        println!(
            "Checked {} pairs: {} valid, {} invalid, {} errors.",
            self.checked, self.valid, self.invalid, self.errors
        );
    }
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

// ── Loading ──

/// Distinct ad texts in first-seen order, each with the ads that use it.
pub fn group_texts_by_ads(ads: &[TextAd]) -> Vec<(Vec<i64>, String)> {
    let mut groups: Vec<(Vec<i64>, String)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for ad in ads {
        let Some(id) = ad.id else {
            warn!(texts = ad.texts().count(), "Skipping ad without an id");
            continue;
        };
        for text in ad.texts() {
            let slot = *index.entry(text).or_insert_with(|| {
                groups.push((Vec::new(), text.to_string()));
                groups.len() - 1
            });
            let ids = &mut groups[slot].0;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    groups
}

pub fn ads_rows(ads: &[TextAd]) -> Vec<Row> {
    group_texts_by_ads(ads)
        .into_iter()
        .map(|(ids, text)| {
            let joined = ids.iter().map(i64::to_string).collect::<Vec<_>>().join(", ");
            vec![Cell::from(joined), Cell::from(text)]
        })
        .collect()
}

/// Fetch ads and rewrite the Ads sheet with one row per distinct text.
pub async fn load_ads<T: Transport, A: TokenProvider>(
    client: &AdsClient<'_, T, A>,
    store: &impl TableStore,
    customer_id: &str,
    campaigns: &[String],
    limit: Option<u32>,
) -> Result<usize> {
    let ads = fetch_ads(client, customer_id, campaigns, limit).await?;
    let rows = ads_rows(&ads);
    info!(ads = ads.len(), rows = rows.len(), "Writing ad texts");

    store
        .write_rows(ADS_SHEET, &rows, HEADER_ROWS)
        .with_context(|| format!("Failed to write sheet '{}'", ADS_SHEET))?;
    store.flush()?;
    Ok(rows.len())
}

// ── Validation ──

fn cell_at(row: &[Cell], index: usize) -> Cell {
    row.get(index).cloned().unwrap_or(Cell::Empty)
}

/// Check every ad text against every guideline, one Validation row per pair.
///
/// A pair without a verdict gets an ERROR row and the run carries on; API
/// errors still abort. The store is flushed after every row.
pub async fn validate_text_ads(
    judge: &impl Judge,
    store: &impl TableStore,
) -> Result<ValidationSummary> {
    let guidelines = store.read_rows(GUIDELINES_SHEET, HEADER_ROWS)?;
    let ads = store.read_rows(ADS_SHEET, HEADER_ROWS)?;
    store.truncate(VALIDATION_SHEET, HEADER_ROWS)?;
    info!(ads = ads.len(), guidelines = guidelines.len(), "Validating ad texts");

    let pb = progress_bar(ads.len() * guidelines.len())?;
    let mut summary = ValidationSummary::default();

    for ad in &ads {
        let ad_ids = cell_at(ad, 0);
        let ad_text = cell_at(ad, 1);
        for guideline in &guidelines {
            let guideline_id = cell_at(guideline, 0);
            let parts = text_ad_prompt(
                &guideline_id.to_string(),
                &cell_text(guideline, 1),
                &ad_text.to_string(),
            );
            let verdict = judge
                .judge(&parts)
                .await
                .with_context(|| {
                    format!("Validation failed for ads {} / guideline {}", ad_ids, guideline_id)
                })?;
            summary.record(verdict.as_ref());

            let row = match verdict {
                Some(v) => vec![
                    ad_ids.clone(),
                    ad_text.clone(),
                    guideline_id,
                    Cell::from(v.is_valid),
                    Cell::from(v.reasoning.clone()),
                    Cell::from(v.suggestion_cell()),
                ],
                None => {
                    warn!(
                        ads = %ad_ids,
                        guideline = %guideline_id,
                        "No verdict, writing error row"
                    );
                    vec![
                        ad_ids.clone(),
                        ad_text.clone(),
                        guideline_id,
                        Cell::from(ERROR_MARKER),
                        Cell::from(ERROR_MARKER),
                    ]
                }
            };
            store.append_row(VALIDATION_SHEET, &row)?;
            store.flush()?;
            pb.inc(1);
        }
    }

    pb.finish_and_clear();
    info!(?summary, "Ad validation finished");
    Ok(summary)
}

/// Check every image in the folder against every image guideline.
///
/// Unlike the text flow there is no error row here: a missing verdict stops
/// the run.
pub async fn validate_images(
    judge: &impl Judge,
    store: &impl TableStore,
    source: &impl ImageSource,
) -> Result<ValidationSummary> {
    let guidelines = store.read_rows(IMAGE_GUIDELINES_SHEET, HEADER_ROWS)?;
    store.truncate(IMAGE_VALIDATION_SHEET, HEADER_ROWS)?;
    let images = source.list().await?;
    info!(images = images.len(), guidelines = guidelines.len(), "Validating images");

    let pb = progress_bar(images.len() * guidelines.len())?;
    let mut summary = ValidationSummary::default();

    for image in &images {
        let data = encode_base64(&source.bytes(image).await?);
        for guideline in &guidelines {
            let guideline_id = cell_at(guideline, 0);
            let parts = image_prompt(
                &guideline_id.to_string(),
                &cell_text(guideline, 1),
                &image.mime_type,
                &data,
            );
            let verdict = judge
                .judge(&parts)
                .await
                .with_context(|| {
                    format!("Validation failed for {} / guideline {}", image.url, guideline_id)
                })?;
            info!(url = %image.url, ?verdict, "image checked");
            summary.record(verdict.as_ref());

            let verdict = verdict.ok_or_else(|| {
                anyhow!("No verdict for image {} against guideline {}", image.url, guideline_id)
            })?;
            let row = vec![
                Cell::from(image.url.as_str()),
                Cell::from(image.preview_formula()),
                guideline_id,
                Cell::from(verdict.is_valid),
                Cell::from(verdict.reasoning.as_str()),
                Cell::from(verdict.suggestion_cell()),
            ];
            let row_num = store.append_row(IMAGE_VALIDATION_SHEET, &row)?;
            store.set_row_height(IMAGE_VALIDATION_SHEET, row_num, PREVIEW_ROW_HEIGHT)?;
            store.flush()?;
            pb.inc(1);
        }
    }

    pb.finish_and_clear();
    info!(?summary, "Image validation finished");
    Ok(summary)
}
