use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;

// Global clipboard manager channel - initialized once on first use
static CLIPBOARD_SENDER: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

/// File name the service suggests for downloaded results.
const DEFAULT_DOWNLOAD_NAME: &str = "geocoded_results.csv";

/// Where `d` saves results: `--output` when given, else the default name in the
/// current directory.
pub fn download_destination(output: Option<&PathBuf>) -> Result<PathBuf> {
    if let Some(path) = output {
        return Ok(path.clone());
    }
    let current_dir = std::env::current_dir().context("get current directory")?;
    Ok(current_dir.join(DEFAULT_DOWNLOAD_NAME))
}

/// Initialize the clipboard manager thread if not already initialized.
/// Operations run one at a time, each clipboard instance kept alive long enough for
/// clipboard managers to read it.
fn init_clipboard_manager() -> Result<&'static std_mpsc::Sender<String>> {
    CLIPBOARD_SENDER.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();

        std::thread::spawn(move || {
            use arboard::Clipboard;

            for text in rx {
                if let Ok(mut clipboard) = Clipboard::new() {
                    if clipboard.set_text(&text).is_ok() {
                        std::thread::sleep(Duration::from_secs(2));
                    }
                }
            }
        });

        tx
    });

    CLIPBOARD_SENDER
        .get()
        .ok_or_else(|| anyhow::anyhow!("Failed to initialize clipboard manager"))
}

/// Queue `text` for the clipboard without blocking the UI thread.
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    let sender = init_clipboard_manager()?;
    sender
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("Clipboard manager channel closed"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_flag_wins_over_default_name() {
        let out = PathBuf::from("/tmp/out.csv");
        assert_eq!(download_destination(Some(&out)).unwrap(), out);
        let default = download_destination(None).unwrap();
        assert!(default.ends_with("geocoded_results.csv"));
    }
}
