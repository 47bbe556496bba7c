use langscout_core::error::AppError;
use langscout_core::traits::LanguageDetector;
use scraper::{Html, Node, Selector};
use whatlang::{Detector, Lang};

/// Elements whose text never counts as page content.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "code", "noscript", "template"];

/// Languages the content classifier chooses between.
const DEFAULT_LANGUAGES: &[Lang] = &[Lang::Rus, Lang::Eng, Lang::Fra, Lang::Deu, Lang::Spa];

/// Page language detector.
///
/// Content language comes from `whatlang` over the visible body text,
/// restricted to an allowlist and only reported when the detection is
/// reliable. Tag languages come from `link[hreflang]` and the root
/// `html[lang]` attribute.
#[derive(Clone)]
pub struct HtmlLanguageDetector {
    allowlist: Vec<Lang>,
}

impl HtmlLanguageDetector {
    pub fn new() -> Self {
        Self::with_languages(DEFAULT_LANGUAGES.to_vec())
    }

    pub fn with_languages(allowlist: Vec<Lang>) -> Self {
        Self { allowlist }
    }
}

impl Default for HtmlLanguageDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageDetector for HtmlLanguageDetector {
    fn detect_content_language(&self, page: &str) -> Result<Option<String>, AppError> {
        let document = Html::parse_document(page);
        let body = selector("body")?;

        let text = match document.select(&body).next() {
            Some(body) => visible_text(body),
            None => return Ok(None),
        };
        if text.trim().is_empty() {
            return Ok(None);
        }

        let detector = Detector::with_allowlist(self.allowlist.clone());
        Ok(detector
            .detect(&text)
            .filter(|info| info.is_reliable())
            .and_then(|info| iso_639_1(info.lang()))
            .map(str::to_string))
    }

    fn extract_tag_languages(&self, page: &str) -> Result<Vec<String>, AppError> {
        let document = Html::parse_document(page);
        let hreflang = selector("link[hreflang]")?;
        let html = selector("html")?;

        let mut langs: Vec<String> = document
            .select(&hreflang)
            .filter_map(|el| el.value().attr("hreflang"))
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();

        if let Some(lang) = document
            .select(&html)
            .next()
            .and_then(|el| el.value().attr("lang"))
            .map(str::trim)
            .filter(|l| !l.is_empty())
        {
            langs.push(lang.to_string());
        }

        Ok(langs)
    }
}

fn selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css).map_err(|e| AppError::DetectionError(format!("bad selector '{css}': {e}")))
}

/// Concatenated text of an element, skipping non-content subtrees.
fn visible_text(root: scraper::ElementRef<'_>) -> String {
    let mut text = String::new();
    for node in root.descendants() {
        let Node::Text(chunk) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|el| SKIPPED_ELEMENTS.contains(&el.name()))
        });
        if !hidden {
            text.push_str(chunk);
            text.push(' ');
        }
    }
    text
}

fn iso_639_1(lang: Lang) -> Option<&'static str> {
    Some(match lang {
        Lang::Eng => "en",
        Lang::Rus => "ru",
        Lang::Fra => "fr",
        Lang::Deu => "de",
        Lang::Spa => "es",
        Lang::Ita => "it",
        Lang::Por => "pt",
        Lang::Ukr => "uk",
        Lang::Pol => "pl",
        Lang::Nld => "nl",
        _ => return None,
    })
}
