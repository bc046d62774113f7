//! One page through the vision model: prompt, call, parse.

use crate::error::QaError;
use crate::model::{PageContext, PageResult};
use crate::pipeline::llm::VisionModel;
use crate::pipeline::parse::parse_page;
use crate::prompts::extraction_prompt;
use edgequake_llm::ImageData;
use tracing::{debug, warn};

/// Read `page_number` from its rendered `image`.
///
/// The prompt is `template` prefixed with the previous page's context when
/// there is one. A response that holds no usable JSON yields an empty
/// [`PageResult`]; only a failed model call is an error.
pub async fn extract_page(
    model: &dyn VisionModel,
    image: ImageData,
    page_number: usize,
    template: &str,
    previous: Option<&PageContext>,
) -> Result<PageResult, QaError> {
    let prompt = extraction_prompt(template, previous);
    let raw = model.read_image(image, &prompt).await?;

    match parse_page(&raw, page_number) {
        Some(page) => {
            debug!(
                "Page {}: {} questions, {} parts",
                page_number,
                page.questions.len(),
                page.part_count()
            );
            Ok(page)
        }
        None => {
            warn!(
                "Page {}: model output is not valid JSON, recording an empty page ({} chars)",
                page_number,
                raw.len()
            );
            Ok(PageResult::empty(page_number))
        }
    }
}
