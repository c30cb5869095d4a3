use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Remote-write Payload
// ============================================================================
//
// Wire format: snappy raw block around a protobuf `WriteRequest`.
//
//   WriteRequest { repeated TimeSeries timeseries = 1; }
//   TimeSeries   { repeated Label labels = 1; repeated Sample samples = 2; }
//   Label        { string name = 1; string value = 2; }
//   Sample       { double value = 1; int64 timestamp = 2; }
//
// ============================================================================

pub const METRIC_NAME_LABEL: &str = "__name__";

#[derive(Clone, PartialEq, prost::Message)]
pub struct WriteRequest {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TimeSeries {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Sample {
    #[prost(double, tag = "1")]
    pub value: f64,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("snappy decode: {0}")]
    Snappy(#[from] snap::Error),

    #[error("proto unmarshalling: {0}")]
    Protobuf(#[from] prost::DecodeError),
}

/// Undo the snappy block compression.
pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>, DecodeError> {
    Ok(snap::raw::Decoder::new().decompress_vec(compressed)?)
}

pub fn unmarshal(buf: &[u8]) -> Result<WriteRequest, DecodeError> {
    Ok(<WriteRequest as prost::Message>::decode(buf)?)
}

impl TimeSeries {
    /// Labels as a metric, later duplicates winning.
    pub fn metric(&self) -> Metric<'_> {
        Metric(
            self.labels
                .iter()
                .map(|label| (label.name.as_str(), label.value.as_str()))
                .collect(),
        )
    }
}

/// Label set rendered as `name{a="1", b="2"}`.
pub struct Metric<'a>(BTreeMap<&'a str, &'a str>);

impl fmt::Display for Metric<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.0.get(METRIC_NAME_LABEL);
        let mut labels = self
            .0
            .iter()
            .filter(|(label, _)| **label != METRIC_NAME_LABEL)
            .peekable();

        if labels.peek().is_none() {
            return match name {
                Some(name) => f.write_str(name),
                None => f.write_str("{}"),
            };
        }

        f.write_str(name.copied().unwrap_or_default())?;
        f.write_str("{")?;
        for (i, (label, value)) in labels.enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={:?}", label, value)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
pub(crate) fn encode(req: &WriteRequest) -> Vec<u8> {
    let raw = prost::Message::encode_to_vec(req);
    snap::raw::Encoder::new().compress_vec(&raw).unwrap()
}

#[cfg(test)]
pub(crate) fn series(labels: &[(&str, &str)], samples: &[(f64, i64)]) -> TimeSeries {
    TimeSeries {
        labels: labels
            .iter()
            .map(|(name, value)| Label {
                name: name.to_string(),
                value: value.to_string(),
            })
            .collect(),
        samples: samples
            .iter()
            .map(|&(value, timestamp)| Sample { value, timestamp })
            .collect(),
    }
}
