/*!
 * Device implementations for RelayBox.
 */

pub mod relay_box;

pub use relay_box::{RelayBox, RelayBoxFactory, ReadMode, CHANNELS};
