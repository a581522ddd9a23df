// Layout - padding modes and data formats
//
// User calls pass padding and data formats as strings ("SAME", "nhwc", ...).
// They are parsed into tagged enums at the call boundary so that an
// unrecognized value is rejected before any config is assembled.
//
// Configs never store the user-facing data format. They store the internal
// channel position, which is all the inference rules need:
//
//   NHWC, NDHWC                 -> channels_last
//   NCHW, NCDHW, NCHW_VECT_C    -> channels_first

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Spatial padding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    /// Pad so that `out = ceil(in / stride)`.
    Same,
    /// No padding: windows must fit entirely inside the input.
    Valid,
}

impl Padding {
    /// Parse `SAME` / `VALID`, ignoring case.
    pub fn parse(s: &str, op: impl fmt::Display) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SAME" => Ok(Padding::Same),
            "VALID" => Ok(Padding::Valid),
            _ => Err(Error::invalid(
                op,
                "padding",
                format!("padding must be \"SAME\" or \"VALID\", got \"{s}\""),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Padding::Same => "same",
            Padding::Valid => "valid",
        }
    }
}

/// User-facing tensor layout of an operator's data input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFormat {
    Nchw,
    Nhwc,
    NchwVectC,
    Ncdhw,
    Ndhwc,
}

impl DataFormat {
    /// Formats accepted by 2-D convolution.
    pub const CONV_2D: &'static [DataFormat] = &[DataFormat::Nhwc, DataFormat::Nchw];
    /// Formats accepted by 2-D pooling.
    pub const POOL_2D: &'static [DataFormat] =
        &[DataFormat::Nhwc, DataFormat::Nchw, DataFormat::NchwVectC];
    /// Formats accepted by 3-D pooling.
    pub const POOL_3D: &'static [DataFormat] = &[DataFormat::Ndhwc, DataFormat::Ncdhw];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Nchw => "NCHW",
            DataFormat::Nhwc => "NHWC",
            DataFormat::NchwVectC => "NCHW_VECT_C",
            DataFormat::Ncdhw => "NCDHW",
            DataFormat::Ndhwc => "NDHWC",
        }
    }

    /// Parse a data format, ignoring case, and require it to be one of `allowed`.
    pub fn parse(s: &str, allowed: &[DataFormat], op: impl fmt::Display) -> Result<Self> {
        let upper = s.to_ascii_uppercase();
        allowed
            .iter()
            .copied()
            .find(|f| f.as_str() == upper)
            .ok_or_else(|| {
                let names: Vec<&str> = allowed.iter().map(|f| f.as_str()).collect();
                Error::invalid(
                    op,
                    "data_format",
                    format!("data_format must be one of {}, got \"{s}\"", names.join(", ")),
                )
            })
    }

    pub fn channel_position(&self) -> ChannelPosition {
        match self {
            DataFormat::Nhwc | DataFormat::Ndhwc => ChannelPosition::ChannelsLast,
            DataFormat::Nchw | DataFormat::NchwVectC | DataFormat::Ncdhw => {
                ChannelPosition::ChannelsFirst
            }
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the channel axis sits in a rank-N data blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPosition {
    ChannelsFirst,
    ChannelsLast,
}

impl ChannelPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelPosition::ChannelsFirst => "channels_first",
            ChannelPosition::ChannelsLast => "channels_last",
        }
    }

    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "channels_first" => Some(ChannelPosition::ChannelsFirst),
            "channels_last" => Some(ChannelPosition::ChannelsLast),
            _ => None,
        }
    }

    /// Index of the channel axis for a blob of the given rank (rank >= 2).
    pub fn channel_axis(&self, rank: usize) -> usize {
        match self {
            ChannelPosition::ChannelsFirst => 1,
            ChannelPosition::ChannelsLast => rank - 1,
        }
    }

    /// Indices of the spatial axes for a blob of the given rank (rank >= 2).
    pub fn spatial_axes(&self, rank: usize) -> std::ops::Range<usize> {
        match self {
            ChannelPosition::ChannelsFirst => 2..rank,
            ChannelPosition::ChannelsLast => 1..rank - 1,
        }
    }
}

impl fmt::Display for ChannelPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_case_insensitive() {
        assert_eq!(Padding::parse("same", "Conv2D").unwrap(), Padding::Same);
        assert_eq!(Padding::parse("Valid", "Conv2D").unwrap(), Padding::Valid);
        let err = Padding::parse("full", "Conv2D").unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { ref field, .. } if field == "padding"));
    }

    #[test]
    fn test_data_format_allowed_set() {
        let f = DataFormat::parse("nchw", DataFormat::CONV_2D, "Conv2D").unwrap();
        assert_eq!(f, DataFormat::Nchw);
        assert!(DataFormat::parse("NCHW_VECT_C", DataFormat::CONV_2D, "Conv2D").is_err());
        let f = DataFormat::parse("NCHW_VECT_C", DataFormat::POOL_2D, "MaxPool2D").unwrap();
        assert_eq!(f.channel_position(), ChannelPosition::ChannelsFirst);
        assert!(DataFormat::parse("NHWC", DataFormat::POOL_3D, "MaxPool3D").is_err());
    }

    #[test]
    fn test_axes() {
        let first = ChannelPosition::ChannelsFirst;
        let last = ChannelPosition::ChannelsLast;
        assert_eq!(first.channel_axis(4), 1);
        assert_eq!(last.channel_axis(4), 3);
        assert_eq!(first.spatial_axes(5), 2..5);
        assert_eq!(last.spatial_axes(4), 1..3);
    }
}
