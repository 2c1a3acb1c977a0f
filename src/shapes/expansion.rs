//! Compact-to-per-layer configuration expansion
//!
//! Turns a sampled shaped-network configuration (`resnet_shape`,
//! `num_groups`, `max_units`, dropout shape parameters) into the full
//! per-layer configuration consumed by the network builder.

use crate::error::Result;
use crate::shapes::profile::{shaped_magnitudes, ShapeFamily};
use crate::space::{optional_bool, require_float, require_int, require_str, ParamValue, RawConfig};

/// Scale the dropout profile is generated at before rescaling by
/// `max_dropout`.
const DROPOUT_PROFILE_SCALE: f64 = 1000.0;

/// Expand a compact shaped-network configuration.
///
/// Synthesizes `num_units_0 ..= num_units_{num_groups}` (exactly
/// `num_groups + 1` entries; the shape is generated over `num_groups + 2`
/// points and the trailing terminal width, fixed externally by
/// `out_features`, is dropped) and, when `use_dropout` is set,
/// `dropout_1 ..= dropout_{num_groups}` (block 0 carries no dropout).
///
/// The caller's map is never mutated; a `num_groups` of zero degenerates
/// to a single width entry without error.
pub fn expand_shaped_config(
    config: &RawConfig,
    in_features: usize,
    out_features: usize,
) -> Result<RawConfig> {
    let shape: ShapeFamily = require_str(config, "resnet_shape")?.parse()?;
    let num_groups = usize::try_from(require_int(config, "num_groups")?)
        .map_err(|_| crate::error::AutomlError::invalid("num_groups", "<negative>", "must be non-negative"))?;
    let max_units = require_float(config, "max_units")?;

    let mut expanded = config.clone();

    let widths = shaped_magnitudes(
        shape,
        in_features as f64,
        out_features as f64,
        max_units,
        num_groups + 2,
    );
    // the final entry is the network's true output width, already fixed
    for (i, width) in widths.iter().take(num_groups + 1).enumerate() {
        let units = (width.round() as i64).max(1);
        expanded.insert(format!("num_units_{}", i), ParamValue::Int(units));
    }

    if optional_bool(config, "use_dropout", false)? {
        let dropout_shape: ShapeFamily = require_str(config, "dropout_shape")?.parse()?;
        let max_dropout = require_float(config, "max_dropout")?;
        let profile = shaped_magnitudes(dropout_shape, 0.0, 0.0, DROPOUT_PROFILE_SCALE, num_groups);
        for (i, value) in profile.iter().enumerate() {
            let rate = value / DROPOUT_PROFILE_SCALE * max_dropout;
            expanded.insert(format!("dropout_{}", i + 1), ParamValue::Float(rate));
        }
    }

    Ok(expanded)
}
