//! PDF rasterisation: the pdfium-backed [`PageSource`].
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is not safe to drive from async contexts. Every pdfium call runs
//! on `tokio::task::spawn_blocking` so rendering never stalls a runtime
//! worker.
//!
//! A loaded `PdfDocument` borrows its `Pdfium` binding and cannot cross
//! threads, so each page render opens the document again. Opening is cheap
//! next to a vision-model call.

use crate::config::ExtractionConfig;
use crate::error::QaError;
use crate::pipeline::encode::encode_page;
use crate::pipeline::source::PageSource;
use async_trait::async_trait;
use edgequake_llm::ImageData;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A local PDF rendered page by page through pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumSource {
    path: PathBuf,
    source_id: String,
    password: Option<String>,
    dpi: u32,
    max_rendered_pixels: u32,
    page_count: usize,
    title: Option<String>,
}

impl PdfiumSource {
    /// Open `path`, checking that it loads and reading its page count.
    ///
    /// `source_id` is the identity stored in checkpoints; for a downloaded
    /// file it is the URL, not the temp path.
    pub async fn open(
        path: &Path,
        source_id: impl Into<String>,
        config: &ExtractionConfig,
    ) -> Result<Self, QaError> {
        let owned = path.to_path_buf();
        let password = config.password.clone();

        let (page_count, title) = tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium()?;
            let document = load_document(&pdfium, &owned, password.as_deref())?;
            let metadata = document.metadata();
            let title = metadata
                .get(PdfDocumentMetadataTagType::Title)
                .map(|t| t.value().to_string())
                .filter(|v| !v.is_empty());
            Ok::<_, QaError>((document.pages().len() as usize, title))
        })
        .await
        .map_err(|e| QaError::Internal(format!("Open task panicked: {}", e)))??;

        info!("PDF loaded: {} pages", page_count);

        Ok(Self {
            path: path.to_path_buf(),
            source_id: source_id.into(),
            password: config.password.clone(),
            dpi: config.dpi,
            max_rendered_pixels: config.max_rendered_pixels,
            page_count,
            title,
        })
    }

    /// Document title from the PDF info dictionary, if set.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }
}

#[async_trait]
impl PageSource for PdfiumSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn page_count(&self) -> Result<usize, QaError> {
        Ok(self.page_count)
    }

    async fn render_page(&self, page: usize) -> Result<ImageData, QaError> {
        if page == 0 || page > self.page_count {
            return Err(QaError::PageOutOfRange {
                page,
                total: self.page_count,
            });
        }

        let path = self.path.clone();
        let password = self.password.clone();
        let dpi = self.dpi;
        let max_pixels = self.max_rendered_pixels;

        tokio::task::spawn_blocking(move || {
            render_page_blocking(&path, password.as_deref(), dpi, max_pixels, page)
        })
        .await
        .map_err(|e| QaError::Internal(format!("Render task panicked: {}", e)))?
    }
}

/// Bind to `PDFIUM_LIB_PATH` (file or directory) or the system library.
fn bind_pdfium() -> Result<Pdfium, QaError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(p) if !p.is_empty() => {
            let path = PathBuf::from(p);
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            debug!("Binding pdfium from {}", lib.display());
            Pdfium::bind_to_library(&lib)
        }
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| QaError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

fn load_document<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, QaError> {
    pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                QaError::WrongPassword {
                    path: path.to_path_buf(),
                }
            } else {
                QaError::PasswordRequired {
                    path: path.to_path_buf(),
                }
            }
        } else {
            QaError::CorruptPdf {
                path: path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

/// Render and encode one 1-indexed page.
fn render_page_blocking(
    path: &Path,
    password: Option<&str>,
    dpi: u32,
    max_pixels: u32,
    page: usize,
) -> Result<ImageData, QaError> {
    let pdfium = bind_pdfium()?;
    let document = load_document(&pdfium, path, password)?;

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let pages = document.pages();
    let pdf_page = pages
        .get((page - 1) as u16)
        .map_err(|e| QaError::RasterisationFailed {
            page,
            detail: format!("{:?}", e),
        })?;

    let bitmap =
        pdf_page
            .render_with_config(&render_config)
            .map_err(|e| QaError::RasterisationFailed {
                page,
                detail: format!("{:?}", e),
            })?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        page,
        image.width(),
        image.height()
    );

    encode_page(&image).map_err(|e| QaError::RasterisationFailed {
        page,
        detail: format!("Image encoding failed: {}", e),
    })
}
