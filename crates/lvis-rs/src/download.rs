//! Image download from the `coco_url` of each image.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{LvisError, Result};
use crate::lvis::Lvis;

/// File name an image is stored under: the last path segment of its URL.
pub fn file_name_for(url: &str) -> Option<&str> {
    url.rsplit('/').next().filter(|name| !name.is_empty())
}

impl Lvis {
    /// Download images into `save_dir`, all of them when `img_ids` is `None`.
    ///
    /// A file that already exists under the target name is skipped, whatever
    /// its contents. Returns the number of files fetched.
    pub fn download(&self, save_dir: &Path, img_ids: Option<&[u64]>) -> Result<usize> {
        let imgs = self.load_imgs(img_ids)?;
        fs::create_dir_all(save_dir)?;

        let mut fetched = 0usize;
        for img in imgs {
            let url = img.coco_url.as_deref().ok_or_else(|| LvisError::Download {
                url: format!("<image {}>", img.id),
                reason: "image has no coco_url".into(),
            })?;
            let name = file_name_for(url).ok_or_else(|| LvisError::Download {
                url: url.to_string(),
                reason: "URL has no file name".into(),
            })?;
            let target = save_dir.join(name);
            if target.exists() {
                debug!(path = %target.display(), "already present, skipping");
                continue;
            }
            fetch(url, &target)?;
            fetched += 1;
        }
        info!("Downloaded {} images to {}", fetched, save_dir.display());
        Ok(fetched)
    }
}

fn fetch(url: &str, target: &Path) -> Result<()> {
    let response = ureq::get(url).call().map_err(|source| LvisError::Download {
        url: url.to_string(),
        reason: source.to_string(),
    })?;
    let mut reader = response.into_body().into_reader();
    write_via_partial(&mut reader, target)?;
    Ok(())
}

/// `<target>.part`, keeping the target's own extension.
fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

/// Stream `reader` into a `.part` file next to `target`, then rename it.
///
/// An interrupted copy must not leave a file that later runs would skip, so
/// the partial file is removed on error.
fn write_via_partial(reader: &mut impl Read, target: &Path) -> io::Result<()> {
    let partial = partial_path(target);
    let copied = File::create(&partial).and_then(|mut out| io::copy(reader, &mut out));
    if let Err(e) = copied {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    fs::rename(&partial, target)
}
