//! Job pricing in integer paise.

use super::types::{ColorMode, PriceBreakdown, PrintOptions};
use crate::types::{Error, PricingConfig, Result};

/// Price a job.
///
/// `page_counts` has one entry per file; files without a known count use
/// `default_pages_per_file`. Rejects jobs above `max_pages_per_job`.
pub fn calculate_price(
    page_counts: &[Option<u32>],
    options: &PrintOptions,
    config: &PricingConfig,
) -> Result<PriceBreakdown> {
    let pages_per_copy: u64 = page_counts
        .iter()
        .map(|p| u64::from(p.unwrap_or(config.default_pages_per_file)))
        .sum();
    let total_pages = pages_per_copy * u64::from(options.copies);
    if total_pages > u64::from(config.max_pages_per_job) {
        return Err(Error::validation(format!(
            "job has {} pages, limit is {}",
            total_pages, config.max_pages_per_job
        )));
    }
    // Bounded by max_pages_per_job above.
    let total_pages = total_pages as u32;

    let (color_pages, bw_pages) = match options.color_mode {
        ColorMode::Color => (total_pages, 0),
        ColorMode::Bw => (0, total_pages),
    };
    let base_price = u64::from(color_pages) * config.color_price_per_page
        + u64::from(bw_pages) * config.bw_price_per_page;
    let duplex_discount = if options.duplex {
        base_price * config.duplex_discount_percent / 100
    } else {
        0
    };

    Ok(PriceBreakdown {
        total_pages,
        color_pages,
        bw_pages,
        base_price,
        duplex_discount,
        total_price: base_price - duplex_discount,
    })
}
