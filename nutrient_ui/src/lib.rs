#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Placeholder for a future desktop GUI. A host UI is out of scope for this
//! controller; `nutrient_cli` is the only shipped operator surface.
pub fn add(left: u64, right: u64) -> u64 {
    left + right
}
