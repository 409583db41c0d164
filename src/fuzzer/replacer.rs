//! Payload replacement sources
//!
//! A replacement source walks every payload combination of a campaign and
//! crafts one fuzzed message per combination. The engine treats it as an
//! opaque iterator; only the source interprets the traversal strategy.

use crate::error::ReplacerError;
use crate::http::Request;

use super::options::TraversalStrategy;
use super::payloads::PayloadSet;

/// One payload applied to one location of the template message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    /// Location (marker) name
    pub location: String,
    /// Payload substituted at the location
    pub payload: String,
}

/// Source of fuzzed messages for one campaign
pub trait ReplacementSource<M>: Send {
    /// Whether another combination is available
    fn has_next(&self) -> bool;

    /// Crafts the fuzzed message for the next combination
    fn next(&mut self) -> Result<M, ReplacerError>;

    /// Replacements in effect for the most recently drawn combination
    fn current_replacements(&self) -> &[Replacement];

    /// Total number of combinations; fixed for the lifetime of the source
    fn total_replacements(&self) -> u64;

    /// Releases any resources held by the source
    fn close(&mut self) -> Result<(), ReplacerError>;

    /// Whether the source was fully set up before being handed to an engine
    fn is_initialised(&self) -> bool;
}

/// Marker delimiter used in request templates (`§name§`)
pub const MARKER_DELIMITER: char = '§';

/// Collect marker names from a request template, in first-seen order
pub fn markers_in(request: &Request) -> Vec<String> {
    let mut names = Vec::new();

    let mut scan = |text: &str| {
        let mut rest = text;
        while let Some(start) = rest.find(MARKER_DELIMITER) {
            let after = &rest[start + MARKER_DELIMITER.len_utf8()..];
            match after.find(MARKER_DELIMITER) {
                Some(end) => {
                    let name = &after[..end];
                    if !name.is_empty() && !names.iter().any(|n| n == name) {
                        names.push(name.to_string());
                    }
                    rest = &after[end + MARKER_DELIMITER.len_utf8()..];
                }
                None => break,
            }
        }
    };

    scan(&request.url);
    for value in request.headers.values() {
        scan(value);
    }
    if let Some(body) = &request.body {
        scan(body);
    }

    names
}

/// Replacement source substituting `§name§` markers in an HTTP request
/// template with payloads drawn from one payload set per marker.
pub struct MarkerReplacer {
    template: Request,
    entries: Vec<(String, PayloadSet)>,
    strategy: TraversalStrategy,
    indices: Vec<usize>,
    produced: u64,
    total: u64,
    current: Vec<Replacement>,
    closed: bool,
}

impl MarkerReplacer {
    /// Create a replacer over `(marker name, payload set)` pairs
    pub fn new(
        template: Request,
        entries: Vec<(String, PayloadSet)>,
        strategy: TraversalStrategy,
    ) -> Self {
        let total = if entries.is_empty() {
            0
        } else {
            entries
                .iter()
                .map(|(_, set)| set.len() as u64)
                .product()
        };

        let indices = vec![0; entries.len()];

        Self {
            template,
            entries,
            strategy,
            indices,
            produced: 0,
            total,
            current: Vec::new(),
            closed: false,
        }
    }

    /// Substitute the current combination into a copy of the template
    fn craft(&self) -> Result<Request, ReplacerError> {
        let mut crafted = self.template.clone();

        for replacement in &self.current {
            let marker = format!(
                "{}{}{}",
                MARKER_DELIMITER, replacement.location, MARKER_DELIMITER
            );
            let mut occurrences = 0;

            if crafted.url.contains(&marker) {
                crafted.url = crafted.url.replace(&marker, &replacement.payload);
                occurrences += 1;
            }

            for value in crafted.headers.values_mut() {
                if value.contains(&marker) {
                    *value = value.replace(&marker, &replacement.payload);
                    occurrences += 1;
                }
            }

            if let Some(body) = crafted.body.as_mut() {
                if body.contains(&marker) {
                    *body = body.replace(&marker, &replacement.payload);
                    occurrences += 1;
                }
            }

            if occurrences == 0 {
                return Err(ReplacerError::Replacement {
                    location: replacement.location.clone(),
                    reason: "location not present in the template message".to_string(),
                });
            }
        }

        url::Url::parse(&crafted.url)
            .map_err(|e| ReplacerError::Craft(format!("invalid URL after substitution: {}", e)))?;

        Ok(crafted)
    }

    /// Advance the odometer one step in strategy order
    fn advance(&mut self) {
        let positions: Vec<usize> = match self.strategy {
            TraversalStrategy::DepthFirst => (0..self.entries.len()).rev().collect(),
            TraversalStrategy::BreadthFirst => (0..self.entries.len()).collect(),
        };

        for pos in positions {
            self.indices[pos] += 1;
            if self.indices[pos] < self.entries[pos].1.len() {
                return;
            }
            self.indices[pos] = 0;
        }
    }
}

impl ReplacementSource<Request> for MarkerReplacer {
    fn has_next(&self) -> bool {
        !self.closed && self.produced < self.total
    }

    fn next(&mut self) -> Result<Request, ReplacerError> {
        if !self.has_next() {
            return Err(ReplacerError::Exhausted);
        }

        self.current = self
            .entries
            .iter()
            .zip(&self.indices)
            .map(|((name, set), &index)| Replacement {
                location: name.clone(),
                payload: set.payloads[index].clone(),
            })
            .collect();

        let crafted = self.craft();

        self.advance();
        self.produced += 1;

        crafted
    }

    fn current_replacements(&self) -> &[Replacement] {
        &self.current
    }

    fn total_replacements(&self) -> u64 {
        self.total
    }

    fn close(&mut self) -> Result<(), ReplacerError> {
        self.closed = true;
        Ok(())
    }

    fn is_initialised(&self) -> bool {
        !self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> Request {
        let mut request = Request::new("GET", "http://example.com/item?user=§user§");
        request.body = Some("id=§id§".to_string());
        request
    }

    fn entries() -> Vec<(String, PayloadSet)> {
        vec![
            (
                "user".to_string(),
                PayloadSet::new("users", vec!["a".to_string(), "b".to_string()]),
            ),
            (
                "id".to_string(),
                PayloadSet::new("ids", vec!["1".to_string(), "2".to_string()]),
            ),
        ]
    }

    fn drawn_payloads(replacer: &mut MarkerReplacer) -> Vec<(String, String)> {
        let mut out = Vec::new();
        while replacer.has_next() {
            replacer.next().unwrap();
            let current = replacer.current_replacements();
            out.push((current[0].payload.clone(), current[1].payload.clone()));
        }
        out
    }

    #[test]
    fn test_markers_in_template() {
        assert_eq!(markers_in(&template()), vec!["user", "id"]);
    }

    #[test]
    fn test_total_is_product() {
        let replacer = MarkerReplacer::new(template(), entries(), TraversalStrategy::DepthFirst);
        assert_eq!(replacer.total_replacements(), 4);
        assert!(replacer.is_initialised());
    }

    #[test]
    fn test_depth_first_order() {
        let mut replacer =
            MarkerReplacer::new(template(), entries(), TraversalStrategy::DepthFirst);
        let drawn = drawn_payloads(&mut replacer);
        let expected: Vec<(String, String)> = [("a", "1"), ("a", "2"), ("b", "1"), ("b", "2")]
            .iter()
            .map(|(u, i)| (u.to_string(), i.to_string()))
            .collect();
        assert_eq!(drawn, expected);
    }

    #[test]
    fn test_breadth_first_order() {
        let mut replacer =
            MarkerReplacer::new(template(), entries(), TraversalStrategy::BreadthFirst);
        let drawn = drawn_payloads(&mut replacer);
        let expected: Vec<(String, String)> = [("a", "1"), ("b", "1"), ("a", "2"), ("b", "2")]
            .iter()
            .map(|(u, i)| (u.to_string(), i.to_string()))
            .collect();
        assert_eq!(drawn, expected);
    }

    #[test]
    fn test_substitution_reaches_url_and_body() {
        let mut replacer =
            MarkerReplacer::new(template(), entries(), TraversalStrategy::DepthFirst);
        let crafted = replacer.next().unwrap();
        assert_eq!(crafted.url, "http://example.com/item?user=a");
        assert_eq!(crafted.body.as_deref(), Some("id=1"));
    }

    #[test]
    fn test_missing_location_is_replacement_error()  {
        let request = Request::new("GET", "http://example.com/");
        let mut replacer = MarkerReplacer::new(
            request,
            vec![(
                "user".to_string(),
                PayloadSet::new("users", vec!["a".to_string()]),
            )],
            TraversalStrategy::DepthFirst,
        );

        let error = replacer.next().unwrap_err();
        assert!(matches!(error, ReplacerError::Replacement { .. }));
        assert_eq!(replacer.current_replacements().len(), 1);
    }

    #[test]
    fn test_close_stops_iteration() {
        let mut replacer =
            MarkerReplacer::new(template(), entries(), TraversalStrategy::DepthFirst);
        replacer.next().unwrap();
        replacer.close().unwrap();
        assert!(!replacer.has_next());
        assert!(matches!(replacer.next(), Err(ReplacerError::Exhausted)));
    }

    #[test]
    fn test_uninitialised_without_entries() {
        let replacer = MarkerReplacer::new(template(), Vec::new(), TraversalStrategy::DepthFirst);
        assert!(!replacer.is_initialised());
        assert_eq!(replacer.total_replacements(), 0);
    }
}
