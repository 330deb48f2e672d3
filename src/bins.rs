//! Bin math
//!
//! Stateless conversions between continuous quantities (platform coordinates,
//! velocity/angle/action vectors, scalar values) and discrete bin indices.
//!
//! Every function is total. Values outside their domain are never an error:
//! platform coordinates off the platform map to [`OFF_PLATFORM`], and ranged
//! values are clamped into `[0, number_of_bins)` with a warning.

use crate::types::Vec3;

/// Sentinel returned for positions that are not on the platform
pub const OFF_PLATFORM: i32 = -1;

/// Map a local position (x, z) on a square platform centered at the origin to
/// a row-major bin index, or [`OFF_PLATFORM`] when outside `[-radius, radius)`.
pub fn coordinates_to_bin(position: Vec3, platform_radius: f32, bins_per_axis: i32) -> i32 {
    let norm_x = position.x + platform_radius;
    let norm_z = position.z + platform_radius;
    let scale = platform_radius * 2.0;
    let bin_size = scale / bins_per_axis as f32;

    if norm_x < 0.0 || norm_x >= scale || norm_z < 0.0 || norm_z >= scale {
        return OFF_PLATFORM;
    }

    let discrete_x = (norm_x / bin_size) as i32;
    let discrete_z = (norm_z / bin_size) as i32;

    discrete_x * bins_per_axis + discrete_z
}

/// Center of the square-platform cell `bin`, with the given height
pub fn bin_to_coordinates(bin: i32, platform_radius: f32, bins_per_axis: i32, y: f32) -> Vec3 {
    let bin_size = (platform_radius * 2.0) / bins_per_axis as f32;

    Vec3::new(
        (bin / bins_per_axis) as f32 * bin_size - platform_radius + bin_size / 2.0,
        y,
        (bin % bins_per_axis) as f32 * bin_size - platform_radius + bin_size / 2.0,
    )
}

/// True when the bin lies on the outer ring of a square grid
pub fn is_edge_bin(bin: i32, bins_per_axis: i32) -> bool {
    // first and last row
    if bin < bins_per_axis || bin >= (bins_per_axis - 1) * bins_per_axis {
        return true;
    }

    let column = bin % bins_per_axis;
    column == 0 || column == bins_per_axis - 1
}

/// True for the first and last bin of a 1-D range
pub fn is_edge_bin_1d(bin: i32, number_of_bins: i32) -> bool {
    bin == 0 || bin == number_of_bins - 1
}

/// Map a vector inside `[min, min + range]` to a bin.
///
/// A zero y-range collapses to the 2-D encoding `x * b + z` with `b²` bins,
/// otherwise the encoding is `x * b² + y * b + z` with `b³` bins.
pub fn range_vector_to_bin(vector: Vec3, range: Vec3, bins_per_axis: i32, min: Vec3) -> i32 {
    let b = bins_per_axis as f32;
    let norm = vector - min;

    let discrete_x = (norm.x / (range.x / b)) as i32;
    let discrete_z = (norm.z / (range.z / b)) as i32;

    check_vector_in_range(vector, min, range);

    if range.y == 0.0 {
        let bin = discrete_x * bins_per_axis + discrete_z;
        return resolve_out_of_range(
            &vector,
            bin,
            &range,
            bins_per_axis.pow(2),
            "range_vector_to_bin",
        );
    }

    let discrete_y = (norm.y / (range.y / b)) as i32;
    let bin = discrete_x * bins_per_axis.pow(2) + discrete_y * bins_per_axis + discrete_z;

    resolve_out_of_range(
        &vector,
        bin,
        &range,
        bins_per_axis.pow(3),
        "range_vector_to_bin",
    )
}

/// Center of the range-vector cell `bin`
pub fn bin_to_range_vector(bin: i32, range: Vec3, bins_per_axis: i32, min: Vec3) -> Vec3 {
    let b = bins_per_axis as f32;
    let size = Vec3::new(range.x / b, range.y / b, range.z / b);

    if range.y == 0.0 {
        return Vec3::new(
            (bin / bins_per_axis) as f32 * size.x + min.x + size.x / 2.0,
            min.y,
            (bin % bins_per_axis) as f32 * size.z + min.z + size.z / 2.0,
        );
    }

    Vec3::new(
        (bin / bins_per_axis.pow(2)) as f32 * size.x + min.x + size.x / 2.0,
        ((bin / bins_per_axis) % bins_per_axis) as f32 * size.y + min.y + size.y / 2.0,
        (bin % bins_per_axis) as f32 * size.z + min.z + size.z / 2.0,
    )
}

/// Bin of a value inside `[0, range)`
pub fn continuous_value_to_bin_zero_based(value: f32, range: f32, number_of_bins: i32) -> i32 {
    if number_of_bins <= 1 {
        return 0;
    }

    let bin_size = range / number_of_bins as f32;
    let bin = (value / bin_size) as i32;

    resolve_out_of_range(
        &value,
        bin,
        &range,
        number_of_bins,
        "continuous_value_to_bin_zero_based",
    )
}

/// Bin of a value inside `[min, max]`.
///
/// One bin always yields 0 and values above `max` yield the last bin.
pub fn continuous_value_to_bin(value: f32, min: f32, max: f32, number_of_bins: i32) -> i32 {
    if number_of_bins <= 1 {
        return 0;
    }

    if value > max {
        return number_of_bins - 1;
    }

    let range = max - min;
    let bin_size = range / number_of_bins as f32;
    let bin = ((value - min) / bin_size) as i32;

    resolve_out_of_range(&value, bin, &range, number_of_bins, "continuous_value_to_bin")
}

/// Center of `bin` inside `[min, max]`
pub fn bin_to_continuous_value(bin: i32, min: f32, max: f32, number_of_bins: i32) -> f32 {
    let bin_size = (max - min) / number_of_bins as f32;

    bin as f32 * bin_size + bin_size / 2.0 + min
}

/// Bins crossed by a direction vector starting at the center of `start_bin`.
///
/// The vector is truncated to the platform diameter, then `2 * bins_per_axis`
/// equally spaced steps (end point included) are sampled. The result holds
/// distinct bins in first-encounter order, without the start bin and without
/// off-platform samples.
pub fn get_crossed_bins(
    direction: Vec3,
    start_bin: i32,
    bins_per_axis: i32,
    platform_radius: f32,
) -> Vec<i32> {
    let cut = cut_vector(direction, platform_radius);
    let samples = bins_per_axis as f32 * 2.0;
    let start = bin_to_coordinates(start_bin, platform_radius, bins_per_axis, 0.0);

    let mut crossed = Vec::new();

    for i in 0..=(samples as i32) {
        let t = i as f32 / samples;
        let point = Vec3::new(start.x + t * cut.x, 0.0, start.z + t * cut.z);
        let bin = coordinates_to_bin(point, platform_radius, bins_per_axis);

        if bin != OFF_PLATFORM && bin != start_bin && !crossed.contains(&bin) {
            crossed.push(bin);
        }
    }

    crossed
}

/// Bins crossed along a 1-D range when starting from one of its edge bins
pub fn get_crossed_bins_1d(
    velocity: f32,
    bin: i32,
    number_of_bins: i32,
    range_min: f32,
    range_max: f32,
) -> Vec<i32> {
    let bin_size = (range_max - range_min) / number_of_bins as f32;
    let crossed_count = (velocity.abs() / bin_size) as i32;

    let mut crossed = Vec::new();

    if bin == 0 && velocity > 0.0 {
        crossed.extend((1..=crossed_count).filter(|b| *b < number_of_bins));
    }

    if bin == number_of_bins - 1 && velocity < 0.0 {
        let lowest = (number_of_bins - 1 - crossed_count).max(0);
        crossed.extend((lowest..=number_of_bins - 2).rev());
    }

    crossed
}

fn cut_vector(vector: Vec3, platform_radius: f32) -> Vec3 {
    let diameter = platform_radius * 2.0;
    let max = vector.x.abs().max(vector.z.abs());

    if max > diameter {
        return Vec3::new(vector.x * (diameter / max), 0.0, vector.z * (diameter / max));
    }

    vector
}

fn resolve_out_of_range<T: std::fmt::Debug, R: std::fmt::Debug>(
    value: &T,
    bin: i32,
    range: &R,
    number_of_bins: i32,
    operation: &str,
) -> i32 {
    if bin < 0 || bin >= number_of_bins {
        log::warn!(
            "Bin out of range: value={:?}, bin={}, numberOfBins={}, range={:?}, function={}",
            value,
            bin,
            number_of_bins,
            range,
            operation
        );
        return bin.clamp(0, (number_of_bins - 1).max(0));
    }

    bin
}

fn check_vector_in_range(vector: Vec3, min: Vec3, range: Vec3) {
    let max = min + range;
    let within = |v: f32, lo: f32, hi: f32| {
        (approximately(v, lo) || v > lo) && (approximately(v, hi) || v < hi)
    };

    if !within(vector.x, min.x, max.x) || !within(vector.z, min.z, max.z) {
        log::warn!(
            "Vector is not in defined range: min: {:?}, range: {:?}, vector: {:?}",
            min,
            range,
            vector
        );
    }
}

fn approximately(a: f32, b: f32) -> bool {
    (b - a).abs() < (1e-6 * a.abs().max(b.abs())).max(f32::EPSILON * 8.0)
}
