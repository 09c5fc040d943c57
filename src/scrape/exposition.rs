//! Prometheus text exposition format.
//!
//! Parsing, label stamping and re-encoding are done by
//! [`prom_text_format_parser`]. The encoded body is then normalized for the
//! Pushgateway: timestamps are dropped (the gateway rejects them), labels are
//! de-duplicated and sorted, and the label layers of the target always win
//! over same-named labels exposed by the target itself.

use std::collections::BTreeMap;

use prom_text_format_parser::Scrape;
use thiserror::Error;

use crate::labels::LabelSet;

/// A scrape body the parser rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ExpositionError {
    pub reason: String,
}

/// One parsed scrape body.
pub struct Exposition {
    scrape: Scrape,
    samples: usize,
}

impl Exposition {
    /// Number of sample lines in the body.
    pub fn sample_count(&self) -> usize {
        self.samples
    }
}

impl std::fmt::Debug for Exposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exposition")
            .field("samples", &self.samples)
            .finish_non_exhaustive()
    }
}

/// Parse a scrape body.
pub fn parse(text: &str) -> Result<Exposition, ExpositionError> {
    let scrape = Scrape::parse(text).map_err(|e| ExpositionError {
        reason: format!("{:?}", e),
    })?;
    let samples = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .count();
    Ok(Exposition { scrape, samples })
}

/// Text body of one scrape with the target's label layers merged in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushBatch {
    body: String,
    samples: usize,
}

impl PushBatch {
    /// Stamp `labels` onto every sample, replacing same-named sample labels.
    pub fn labeled(exposition: Exposition, labels: &LabelSet) -> Self {
        let Exposition { mut scrape, .. } = exposition;
        for (name, value) in labels {
            scrape.add_label(name.as_str(), value.as_str());
        }

        let layer: BTreeMap<&str, String> = labels
            .iter()
            .map(|(name, value)| (name.as_str(), escape_label_value(value)))
            .collect();
        let (body, samples) = normalize(&scrape.to_string(), &layer);
        Self { body, samples }
    }

    /// Total number of samples.
    pub fn sample_count(&self) -> usize {
        self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    /// Text body for the gateway.
    pub fn encode(&self) -> String {
        self.body.clone()
    }
}

/// Rewrite every sample line of `rendered`; comment lines pass through.
///
/// Returns the new body and its sample count.
fn normalize(rendered: &str, layer: &BTreeMap<&str, String>) -> (String, usize) {
    let mut out = String::with_capacity(rendered.len());
    let mut samples = 0;
    for line in rendered.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('#') {
            out.push_str(trimmed);
        } else {
            samples += 1;
            match rewrite_sample(trimmed, layer) {
                Some(sample) => out.push_str(&sample),
                None => out.push_str(trimmed),
            }
        }
        out.push('\n');
    }
    (out, samples)
}

/// `name{labels} value [timestamp]` to `name{sorted labels} value`, with the
/// escaped `layer` values overriding labels of the same name.
fn rewrite_sample(line: &str, layer: &BTreeMap<&str, String>) -> Option<String> {
    let name_end = line.find(|c: char| c == '{' || c.is_whitespace())?;
    let name = &line[..name_end];
    let mut rest = &line[name_end..];

    let mut labels: BTreeMap<&str, &str> = BTreeMap::new();
    if let Some(block) = rest.strip_prefix('{') {
        let (pairs, after) = split_label_block(block)?;
        labels.extend(pairs);
        rest = after;
    }
    for (label, value) in layer {
        labels.insert(label, value.as_str());
    }

    let value = rest.split_whitespace().next()?;

    let mut sample = String::from(name);
    if !labels.is_empty() {
        sample.push('{');
        for (i, (label, value)) in labels.iter().enumerate() {
            if i > 0 {
                sample.push(',');
            }
            sample.push_str(label);
            sample.push_str("=\"");
            sample.push_str(value);
            sample.push('"');
        }
        sample.push('}');
    }
    sample.push(' ');
    sample.push_str(value);
    Some(sample)
}

/// Split the inside of `{...}` into raw (still escaped) pairs and the text
/// after the closing brace.
fn split_label_block(block: &str) -> Option<(Vec<(&str, &str)>, &str)> {
    let mut pairs = Vec::new();
    let mut rest = block;
    loop {
        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        if let Some(after) = rest.strip_prefix('}') {
            return Some((pairs, after));
        }
        let (name, tail) = rest.split_once('=')?;
        let tail = tail.trim_start().strip_prefix('"')?;
        let end = closing_quote(tail)?;
        pairs.push((name.trim(), &tail[..end]));
        rest = &tail[end + 1..];
    }
}

fn closing_quote(value: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(i),
            _ => {}
        }
    }
    None
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', r"\\")
        .replace('"', "\\\"")
        .replace('\n', r"\n")
}
