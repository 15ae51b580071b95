//! Settlement catalog
//!
//! The closed list of place names a destination or home settlement must come
//! from, with similarity lookup for near misses.

use std::fs;
use std::io;
use std::path::Path;

const BUILTIN_SETTLEMENTS: &[&str] = &[
    "קצרין",
    "אודם",
    "אורטל",
    "אל רום",
    "אלוני הבשן",
    "אבני איתן",
    "אניעם",
    "אפיק",
    "בני יהודה",
    "גבעת יואב",
    "גשור",
    "חד נס",
    "חספין",
    "יונתן",
    "כנף",
    "כפר חרוב",
    "מבוא חמה",
    "מיצר",
    "מעלה גמלא",
    "מרום גולן",
    "נאות גולן",
    "נווה אטיב",
    "נוב",
    "נטור",
    "עין זיוון",
    "קדמת צבי",
    "קלע אלון",
    "קשת",
    "רמות",
    "רמת מגשימים",
    "שעל",
    "מג'דל שמס",
    "מסעדה",
    "בוקעאתא",
    "עין קנייא",
    "עין גב",
    "טבריה",
    "צפת",
    "ראש פינה",
    "חצור הגלילית",
    "קריית שמונה",
    "מטולה",
    "כרמיאל",
    "עכו",
    "נהריה",
    "חיפה",
    "נצרת",
    "נוף הגליל",
    "עפולה",
    "בית שאן",
    "יקנעם",
    "חדרה",
    "נתניה",
    "הרצליה",
    "רעננה",
    "כפר סבא",
    "תל אביב",
    "פתח תקווה",
    "ראשון לציון",
    "רחובות",
    "מודיעין",
    "ירושלים",
    "בית שמש",
    "אשדוד",
    "אשקלון",
    "באר שבע",
    "אילת",
];

#[derive(Debug, Clone)]
pub struct SettlementCatalog {
    names: Vec<String>,
}

impl Default for SettlementCatalog {
    fn default() -> Self {
        Self::new(BUILTIN_SETTLEMENTS.iter().map(|name| name.to_string()))
    }
}

impl SettlementCatalog {
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        let mut names: Vec<String> = names
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    /// One name per line. Blank lines and `#` comments are skipped.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        let catalog = Self::new(
            content
                .lines()
                .filter(|line| !line.trim_start().starts_with('#'))
                .map(str::to_string),
        );
        tracing::info!(path = %path.display(), settlements = catalog.len(), "settlement catalog loaded");
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The canonical spelling of `input`, if it names a known settlement.
    pub fn lookup(&self, input: &str) -> Option<&str> {
        let wanted = canonical(input);
        self.names
            .iter()
            .find(|name| canonical(name) == wanted)
            .map(String::as_str)
    }

    /// Names whose similarity to `input` is at least `threshold`, best first.
    pub fn suggest(&self, input: &str, threshold: f64, limit: usize) -> Vec<String> {
        let wanted = canonical(input);
        if wanted.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(f64, &String)> = self
            .names
            .iter()
            .map(|name| (strsim::normalized_levenshtein(&wanted, &canonical(name)), name))
            .filter(|(score, _)| *score >= threshold)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, name)| name.clone())
            .collect()
    }
}

fn canonical(name: &str) -> String {
    name.trim()
        .trim_matches(['"', '\'', '.'])
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_name_suggests_the_full_one() {
        let catalog = SettlementCatalog::default();
        assert!(catalog.lookup("חיפ").is_none());

        let suggestions = catalog.suggest("חיפ", 0.6, 3);
        assert!(!suggestions.is_empty());
        assert!(suggestions.len() <= 3);
        assert_eq!(suggestions[0], "חיפה");
    }

    #[test]
    fn test_lookup_ignores_spacing_and_dashes() {
        let catalog = SettlementCatalog::default();
        assert_eq!(catalog.lookup("  תל-אביב "), Some("תל אביב"));
        assert_eq!(catalog.lookup("קצרין"), Some("קצרין"));
    }

    #[test]
    fn test_nothing_similar_yields_no_suggestions() {
        let catalog = SettlementCatalog::default();
        assert!(catalog.suggest("zzzzzzzz", 0.6, 3).is_empty());
        assert!(catalog.suggest("   ", 0.6, 3).is_empty());
    }

    #[test]
    fn test_from_file_replaces_the_builtin_list() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# golan\nAlpha\n\nBeta\nAlpha").unwrap();

        let catalog = SettlementCatalog::from_file(file.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.lookup("alpha"), Some("Alpha"));
        assert!(catalog.lookup("חיפה").is_none());
    }
}
