//! Per-request transformation mode, switched on by a keyword in the user's message
use regex::Regex;

#[derive(Debug, Clone)]
pub struct TransformationDetector {
    pattern: Option<Regex>,
}

impl TransformationDetector {
    /// An empty keyword disables detection
    pub fn new(keyword: &str) -> anyhow::Result<Self> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Self { pattern: None });
        }
        let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(keyword)))
            .map_err(|e| anyhow::anyhow!("Invalid transformation keyword: {}", e))?;
        Ok(Self { pattern: Some(pattern) })
    }

    pub fn detect(&self, message: &str) -> bool {
        self.pattern.as_ref().is_some_and(|p| p.is_match(message))
    }
}
