use std::{
    fs::{self, File},
    path::Path,
    time::Duration,
};

use log::info;
use reqwest::{
    blocking::Client,
    header::{UPGRADE_INSECURE_REQUESTS, USER_AGENT},
    StatusCode,
};

use crate::error::{LoadError, Result};

/// Local file name for the download, overwritten on every run.
pub fn local_file_name(url: &str) -> &'static str {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .to_lowercase();
    if path.ends_with(".csv") || path.ends_with(".csv.gz") {
        "output.csv"
    } else {
        "output.parquet"
    }
}

/// Fetch `url` into `file_path`, replacing any existing file.  Returns the
/// number of bytes written.  No retries.
pub fn download_file(url: &str, file_path: &Path) -> Result<u64> {
    let client = Client::builder()
        .timeout(None::<Duration>)
        .build()
        .map_err(|e| LoadError::download(url, e))?;
    let mut response = client
        .get(url)
        .header(USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36")
        .header(UPGRADE_INSECURE_REQUESTS, "1")
        .send()
        .map_err(|e| LoadError::download(url, e))?;
    if response.status() != StatusCode::OK {
        return Err(LoadError::download(
            url,
            format!("status {}", response.status()),
        ));
    }

    if let Some(dir) = file_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| LoadError::io(dir, e))?;
    }
    let mut out = File::create(file_path).map_err(|e| LoadError::io(file_path, e))?;
    let n = response
        .copy_to(&mut out)
        .map_err(|e| LoadError::download(url, e))?;
    info!("downloaded {} bytes from {} to {}", n, url, file_path.display());
    Ok(n)
}
