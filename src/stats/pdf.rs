//! Static PDF snapshot of the served dashboard via headless Chrome.

use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::collector::make_world_readable;
use crate::error::{Error, Result};

pub const PDF_FILE: &str = "dashboard.pdf";

/// Set by the dashboard script once every chart and card is drawn.
pub const RENDER_COMPLETE_SELECTOR: &str = "#render-complete";

pub const DEFAULT_RENDER_WAIT: Duration = Duration::from_secs(30);

fn print_options() -> PrintToPdfOptions {
    PrintToPdfOptions {
        landscape: Some(true),
        print_background: Some(true),
        prefer_css_page_size: Some(false),
        ..Default::default()
    }
}

fn rendering_failed(stage: &str) -> impl Fn(anyhow::Error) -> Error + '_ {
    move |e| Error::RenderingFailed(format!("{}: {}", stage, e))
}

fn capture(url: &str, wait: Duration) -> Result<Vec<u8>> {
    let options = LaunchOptions::default_builder()
        .headless(true)
        .sandbox(false)
        .idle_browser_timeout(wait + Duration::from_secs(30))
        .build()
        .map_err(|e| Error::RenderingFailed(format!("browser options: {}", e)))?;

    let browser = Browser::new(options).map_err(rendering_failed("failed to launch browser"))?;
    let tab = browser.new_tab().map_err(rendering_failed("failed to open tab"))?;

    tab.navigate_to(url).map_err(rendering_failed("navigation failed"))?;
    tab.wait_until_navigated().map_err(rendering_failed("navigation failed"))?;
    tab.wait_for_element_with_custom_timeout(RENDER_COMPLETE_SELECTOR, wait)
        .map_err(rendering_failed("dashboard never finished rendering"))?;

    tab.print_to_pdf(Some(print_options()))
        .map_err(rendering_failed("print to pdf failed"))
}

/// Load `url` in a headless browser and write its print rendering to
/// `results_dir/dashboard.pdf`.
pub async fn write_pdf(url: String, results_dir: &Path, wait: Duration) -> Result<PathBuf> {
    let path = results_dir.join(PDF_FILE);
    let bytes = tokio::task::spawn_blocking(move || capture(&url, wait))
        .await
        .map_err(|e| Error::RenderingFailed(format!("pdf task aborted: {}", e)))??;

    if bytes.is_empty() {
        return Err(Error::RenderingFailed("browser returned an empty pdf".to_string()));
    }
    std::fs::write(&path, bytes)?;
    make_world_readable(&path)?;
    tracing::info!(path = %path.display(), "pdf snapshot written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_options() {
        let options = print_options();
        assert_eq!(options.landscape, Some(true));
        assert_eq!(options.print_background, Some(true));
    }

    #[test]
    fn test_selector_matches_dashboard_marker() {
        let template = include_str!("dashboard.html");
        let id = RENDER_COMPLETE_SELECTOR.trim_start_matches('#');
        assert!(template.contains(&format!("marker.id = \"{}\"", id)));
    }
}
