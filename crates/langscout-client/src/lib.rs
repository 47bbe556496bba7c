pub mod detector;
pub mod fetcher;
pub mod notifier;

#[cfg(test)]
pub(crate) mod testutil;

pub use detector::HtmlLanguageDetector;
pub use fetcher::ReqwestFetcher;
pub use notifier::ReqwestNotifier;
