//! Quality targets: the ordered set of output encoding profiles.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One configured output encoding profile.
///
/// `command` is a full command line with `{ffmpeg}`, `{input}`, `{progress}`
/// and `{output}` placeholders. The encoder always substitutes the same
/// staged paths, so templates can be written once per tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityTarget {
    /// Short label used as the persistence key (e.g. "720").
    pub label: String,
    /// Display badge for published links. Defaults to `"<label>p"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    /// Encoder command template.
    pub command: String,
}

impl QualityTarget {
    pub fn new(label: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            badge: None,
            command: command.into(),
        }
    }

    pub fn with_badge(mut self, badge: impl Into<String>) -> Self {
        self.badge = Some(badge.into());
        self
    }

    pub fn badge(&self) -> String {
        self.badge
            .clone()
            .unwrap_or_else(|| format!("{}p", self.label))
    }

    /// Substitute the staged paths into the command template.
    pub fn render_command(&self, ffmpeg: &str, input: &Path, progress: &Path, output: &Path) -> String {
        self.command
            .replace("{ffmpeg}", ffmpeg)
            .replace("{input}", &input.to_string_lossy())
            .replace("{progress}", &progress.to_string_lossy())
            .replace("{output}", &output.to_string_lossy())
    }

    fn ffmpeg_template(height: u32, crf: u8) -> String {
        format!(
            "{{ffmpeg}} -hide_banner -loglevel error -y -progress '{{progress}}' -i '{{input}}' \
             -map 0 -c:v libx264 -preset veryfast -crf {crf} -vf scale=-2:{height} \
             -c:a aac -b:a 128k -c:s copy '{{output}}'"
        )
    }
}

/// Ordered, immutable set of quality targets configured at process start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualitySet(Vec<QualityTarget>);

impl QualitySet {
    /// Build a validated set. Order is the declared encode order.
    pub fn new(targets: Vec<QualityTarget>) -> Result<Self> {
        let set = Self(targets);
        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::config("at least one quality target is required"));
        }

        let mut seen = HashSet::new();
        for target in &self.0 {
            if target.label.trim().is_empty() {
                return Err(Error::config("quality label must not be empty"));
            }
            if !seen.insert(target.label.as_str()) {
                return Err(Error::config(format!(
                    "duplicate quality label: {}",
                    target.label
                )));
            }
            for placeholder in ["{input}", "{output}"] {
                if !target.command.contains(placeholder) {
                    return Err(Error::config(format!(
                        "command template for {} is missing {}",
                        target.label, placeholder
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QualityTarget> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.0.iter().map(|q| q.label.as_str()).collect()
    }
}

impl Default for QualitySet {
    fn default() -> Self {
        Self(vec![
            QualityTarget::new("1080", QualityTarget::ffmpeg_template(1080, 22)),
            QualityTarget::new("720", QualityTarget::ffmpeg_template(720, 24)),
            QualityTarget::new("480", QualityTarget::ffmpeg_template(480, 26)),
            QualityTarget::new("360", QualityTarget::ffmpeg_template(360, 28)),
        ])
    }
}

impl<'a> IntoIterator for &'a QualitySet {
    type Item = &'a QualityTarget;
    type IntoIter = std::slice::Iter<'a, QualityTarget>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
