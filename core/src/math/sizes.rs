use crate::prelude::{CoreError, CoreResult};

/// Transform lengths with small prime factors (2, 3, 5), ascending.
const TRANSFORM_SIZES: [usize; 240] = [
    32, 64, 96, 128, 160, 192, 256, 288, 320, 384, 480, 512, 576, 640, 768, 800, 864, 960, 1024,
    1152, 1280, 1440, 1536, 1600, 1728, 1920, 2048, 2304, 2400, 2560, 2592, 2880, 3072, 3200, 3456,
    3840, 4000, 4096, 4320, 4608, 4800, 5120, 5184, 5760, 6144, 6400, 6912, 7200, 7680, 7776, 8000,
    8192, 8640, 9216, 9600, 10240, 10368, 11520, 12000, 12288, 12800, 12960, 13824, 14400, 15360,
    15552, 16000, 16384, 17280, 18432, 19200, 20000, 20480, 20736, 21600, 23040, 23328, 24000,
    24576, 25600, 25920, 27648, 28800, 30720, 31104, 32000, 32768, 34560, 36000, 36864, 38400,
    38880, 40000, 40960, 41472, 43200, 46080, 46656, 48000, 49152, 51200, 51840, 55296, 57600,
    60000, 61440, 62208, 64000, 64800, 65536, 69120, 69984, 72000, 73728, 76800, 77760, 80000,
    81920, 82944, 86400, 92160, 93312, 96000, 98304, 100000, 102400, 103680, 108000, 110592,
    115200, 116640, 120000, 122880, 124416, 128000, 129600, 131072, 138240, 139968, 144000,
    147456, 153600, 155520, 160000, 163840, 165888, 172800, 180000, 184320, 186624, 192000,
    194400, 196608, 200000, 204800, 207360, 209952, 216000, 221184, 230400, 233280, 240000,
    245760, 248832, 256000, 259200, 262144, 276480, 279936, 288000, 294912, 300000, 307200,
    311040, 320000, 324000, 327680, 331776, 345600, 349920, 360000, 368640, 373248, 384000,
    388800, 393216, 400000, 409600, 414720, 419904, 432000, 442368, 460800, 466560, 480000,
    491520, 497664, 500000, 512000, 518400, 524288, 540000, 552960, 559872, 576000, 583200,
    589824, 600000, 614400, 622080, 629856, 640000, 648000, 655360, 663552, 691200, 699840,
    720000, 737280, 746496, 768000, 777600, 786432, 800000, 819200, 829440, 839808, 864000,
    884736, 900000, 921600, 933120, 960000, 972000, 983040, 995328, 1000000, 1024000, 1036800,
    1048576,
];

pub const MIN_TRANSFORM_SIZE: usize = TRANSFORM_SIZES[0];
pub const MAX_TRANSFORM_SIZE: usize = TRANSFORM_SIZES[TRANSFORM_SIZES.len() - 1];

/// Smallest supported transform length that holds `requested` samples.
pub fn allowed_size(requested: usize) -> CoreResult<usize> {
    let position = TRANSFORM_SIZES.partition_point(|&size| size < requested);
    TRANSFORM_SIZES
        .get(position)
        .copied()
        .ok_or(CoreError::UnsupportedSize {
            requested,
            max: MAX_TRANSFORM_SIZE,
        })
}

/// Returns true when `size` is itself one of the supported lengths.
pub fn is_allowed(size: usize) -> bool {
    TRANSFORM_SIZES.binary_search(&size).is_ok()
}
