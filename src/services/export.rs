use crate::core::io::Storage;
use crate::core::model::{extension_for_mime, parse_data_uri, sanitize_title, Chapter};
use anyhow::{Context, Result};
use std::path::Path;

/// Write each panel's image to a stable, addressable render target:
/// `<export_dir>/<sanitized title>/panel-<id>.<ext>`. Downstream document
/// assembly works from these files; it is not this crate's concern.
pub async fn export_chapter(
    storage: &dyn Storage,
    export_dir: &str,
    chapter: &Chapter,
) -> Result<Vec<String>> {
    let chapter_dir = Path::new(export_dir).join(sanitize_title(&chapter.title));
    let mut written = Vec::with_capacity(chapter.panels.len());

    for panel in &chapter.panels {
        let image = parse_data_uri(&panel.image_url)
            .with_context(|| format!("panel {} has no decodable image", panel.id))?;
        let file = chapter_dir.join(format!(
            "panel-{}.{}",
            panel.id,
            extension_for_mime(&image.mime_type)
        ));
        let path = file.to_string_lossy().to_string();
        storage.write(&path, &image.data).await?;
        written.push(path);
    }

    log::info!(
        "exported {} panels for chapter {}",
        written.len(),
        chapter.id
    );
    Ok(written)
}
