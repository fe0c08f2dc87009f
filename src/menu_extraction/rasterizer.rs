// Document rasterizer - uploaded bytes to ordered page images
//
// Plain images decode in-process. PDFs are checked and page-counted with lopdf,
// then rendered with the pdftoppm system binary into a temp directory.
use image::{ColorType, DynamicImage};
use lopdf::Document;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::RasterizerConfig;
use crate::types::{ExtractionError, Result};

/// One decoded page. Every preprocessing step produces a new `RasterImage`.
#[derive(Debug, Clone)]
pub struct RasterImage {
    page_index: usize,
    pixels: Arc<DynamicImage>,
}

impl RasterImage {
    pub fn new(page_index: usize, image: DynamicImage) -> Self {
        Self {
            page_index,
            pixels: Arc::new(image),
        }
    }

    /// A new image for the same page.
    pub fn derive(&self, image: DynamicImage) -> Self {
        Self::new(self.page_index, image)
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn color_type(&self) -> ColorType {
        self.pixels.color()
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Image,
    Document,
}

impl DocumentKind {
    pub fn from_multi_page(is_multi_page: bool) -> Self {
        if is_multi_page {
            DocumentKind::Document
        } else {
            DocumentKind::Image
        }
    }

    /// PDF magic bytes win over the name hint.
    pub fn detect(name_hint: Option<&str>, bytes: &[u8]) -> Self {
        if bytes.starts_with(b"%PDF") {
            return DocumentKind::Document;
        }
        match name_hint {
            Some(name) if name.to_ascii_lowercase().ends_with(".pdf") => DocumentKind::Document,
            _ => DocumentKind::Image,
        }
    }
}

pub struct Rasterizer {
    config: RasterizerConfig,
}

impl Rasterizer {
    pub fn new(config: RasterizerConfig) -> Self {
        Self { config }
    }

    /// Decoding runs on the blocking pool. A pdftoppm render in progress is
    /// killed when the returned future is dropped.
    pub async fn rasterize(&self, bytes: &[u8], kind: DocumentKind) -> Result<Vec<RasterImage>> {
        if bytes.is_empty() {
            return Err(ExtractionError::UnsupportedFormat("empty upload".to_string()));
        }
        match kind {
            DocumentKind::Image => {
                let bytes = bytes.to_vec();
                blocking(move || decode_image(0, &bytes).map(|page| vec![page])).await
            }
            DocumentKind::Document => self.rasterize_document(bytes).await,
        }
    }

    async fn rasterize_document(&self, bytes: &[u8]) -> Result<Vec<RasterImage>> {
        let owned = bytes.to_vec();
        let total = blocking(move || page_count(&owned)).await?;
        if total == 0 {
            return Ok(Vec::new());
        }
        let pages = total.min(self.config.max_pages);
        if pages < total {
            warn!(total, kept = pages, "document truncated to max_pages");
        }

        let temp_dir = TempDir::new()?;
        let pdf_path = temp_dir.path().join("upload.pdf");
        tokio::fs::write(&pdf_path, bytes).await?;
        let output_prefix = temp_dir.path().join("page");

        debug!(pages, dpi = self.config.dpi, "rendering document with pdftoppm");
        let output = Command::new(&self.config.pdftoppm_path)
            .arg("-png")
            .arg("-r")
            .arg(self.config.dpi.to_string())
            .arg("-f")
            .arg("1")
            .arg("-l")
            .arg(pages.to_string())
            .arg(&pdf_path)
            .arg(&output_prefix)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::Rasterize(format!(
                "pdftoppm failed: {}",
                stderr.trim()
            )));
        }

        blocking(move || {
            let rendered = rendered_pages(temp_dir.path())?;
            let mut images = Vec::with_capacity(rendered.len());
            for (page_number, path) in rendered {
                let page_index = page_number.saturating_sub(1);
                match std::fs::read(&path)
                    .map_err(ExtractionError::from)
                    .and_then(|data| decode_image(page_index, &data))
                {
                    Ok(image) => images.push(image),
                    Err(e) => warn!(page = page_index, error = %e, "skipping undecodable page"),
                }
            }
            Ok(images)
        })
        .await
    }
}

async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ExtractionError::Rasterize(e.to_string()))?
}

pub fn decode_image(page_index: usize, bytes: &[u8]) -> Result<RasterImage> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| ExtractionError::UnsupportedFormat(e.to_string()))?;
    Ok(RasterImage::new(page_index, image))
}

/// Page count via lopdf; anything lopdf cannot parse is not a document.
pub fn page_count(bytes: &[u8]) -> Result<usize> {
    let document = Document::load_mem(bytes)
        .map_err(|e| ExtractionError::UnsupportedFormat(format!("not a readable PDF: {}", e)))?;
    Ok(document.get_pages().len())
}

// pdftoppm names pages `page-1.png` or `page-01.png` depending on page count.
fn rendered_pages(dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let mut pages = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("png") {
            continue;
        }
        let number = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.rsplit('-').next())
            .and_then(|n| n.parse::<usize>().ok());
        if let Some(number) = number {
            pages.push((number, path));
        }
    }
    pages.sort_by_key(|(number, _)| *number);
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::menu_extraction::probe_version;
    use image::{ImageFormat, Rgb, RgbImage};
    use lopdf::{dictionary, Dictionary, Object, Stream};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 200, 200]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    // Blank pages, `count` of them, each one inch square.
    fn blank_pdf(count: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids: Vec<Object> = Vec::new();
        for _ in 0..count {
            let content_id = doc.add_object(Stream::new(Dictionary::new(), Vec::new()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }
        let media_box: Vec<Object> = [0, 0, 72, 72].into_iter().map(Object::Integer).collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => Object::Integer(count as i64),
                "MediaBox" => media_box,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_page_count_reads_generated_pdf() {
        assert_eq!(page_count(&blank_pdf(3)).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_document_pages_in_order_and_truncated() {
        let config = RasterizerConfig {
            dpi: 36,
            max_pages: 2,
            ..RasterizerConfig::default()
        };
        if probe_version(&config.pdftoppm_path, "-v").await.is_err() {
            eprintln!("pdftoppm not installed, skipping");
            return;
        }

        let rasterizer = Rasterizer::new(config);
        let pages = rasterizer
            .rasterize(&blank_pdf(3), DocumentKind::Document)
            .await
            .unwrap();
        let indices: Vec<usize> = pages.iter().map(|page| page.page_index()).collect();
        assert_eq!(indices, vec![0, 1]);
        // One inch at 36 DPI.
        assert_eq!((pages[0].width(), pages[0].height()), (36, 36));
    }

    #[tokio::test]
    async fn test_missing_pdftoppm_is_an_error() {
        let rasterizer = Rasterizer::new(RasterizerConfig {
            pdftoppm_path: PathBuf::from("/nonexistent/menuscan/pdftoppm"),
            ..RasterizerConfig::default()
        });
        let result = rasterizer.rasterize(&blank_pdf(1), DocumentKind::Document).await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_render_is_killed() {
        use std::os::unix::fs::PermissionsExt;

        // Stands in for pdftoppm: finishes only if it is left running.
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("finished");
        let script = dir.path().join("slow-pdftoppm");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nsleep 1\ntouch '{}'\n", marker.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let rasterizer = Rasterizer::new(RasterizerConfig {
            pdftoppm_path: script,
            ..RasterizerConfig::default()
        });
        let bytes = blank_pdf(1);
        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(300),
            rasterizer.rasterize(&bytes, DocumentKind::Document),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_single_image_is_one_page() {
        let rasterizer = Rasterizer::new(RasterizerConfig::default());
        let pages = rasterizer
            .rasterize(&png_bytes(40, 30), DocumentKind::Image)
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_index(), 0);
        assert_eq!((pages[0].width(), pages[0].height()), (40, 30));
        assert_eq!(pages[0].color_type(), ColorType::Rgb8);
    }

    #[tokio::test]
    async fn test_garbage_bytes_are_unsupported() {
        let rasterizer = Rasterizer::new(RasterizerConfig::default());
        let err = rasterizer
            .rasterize(b"definitely not a menu", DocumentKind::Image)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedFormat(_)));

        let err = rasterizer
            .rasterize(b"%PDF-1.4 truncated", DocumentKind::Document)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_empty_upload_is_unsupported() {
        let rasterizer = Rasterizer::new(RasterizerConfig::default());
        assert!(matches!(
            rasterizer.rasterize(&[], DocumentKind::Document).await,
            Err(ExtractionError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_detect_kind() {
        assert_eq!(DocumentKind::detect(None, b"%PDF-1.7"), DocumentKind::Document);
        assert_eq!(DocumentKind::detect(Some("Menu.PDF"), b"xx"), DocumentKind::Document);
        assert_eq!(DocumentKind::detect(Some("menu.jpg"), b"\xff\xd8"), DocumentKind::Image);
        assert_eq!(DocumentKind::from_multi_page(true), DocumentKind::Document);
        assert_eq!(DocumentKind::from_multi_page(false), DocumentKind::Image);
    }

    #[test]
    fn test_rendered_pages_sorted_numerically() {
        let dir = TempDir::new().unwrap();
        for name in ["page-10.png", "page-02.png", "page-1.png", "upload.pdf"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let pages = rendered_pages(dir.path()).unwrap();
        let numbers: Vec<usize> = pages.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 10]);
    }

    #[test]
    fn test_derive_keeps_page_index() {
        let page = RasterImage::new(4, DynamicImage::new_luma8(3, 3));
        let derived = page.derive(DynamicImage::new_rgb8(5, 5));
        assert_eq!(derived.page_index(), 4);
        assert_eq!(page.width(), 3);
        assert_eq!(derived.width(), 5);
    }
}
