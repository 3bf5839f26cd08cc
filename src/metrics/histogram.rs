use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use hdrhistogram::Histogram;
use hdrhistogram::serialization::{Deserializer, Serializer, V2Serializer};
use std::io::Cursor;

use crate::error::MetricsError;

/// Smallest trackable latency (1 µs).
pub const HISTOGRAM_LOWEST_US: u64 = 1;
/// Largest trackable latency (1 h). Larger observations clamp here.
pub const HISTOGRAM_HIGHEST_US: u64 = 3_600_000_000;
const SIGNIFICANT_DIGITS: u8 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Percentiles {
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
}

/// Fixed-bounds latency histogram in microseconds. Memory does not grow with
/// the number of recorded values.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    hist: Histogram<u64>,
}

impl LatencyHistogram {
    /// Create a new latency histogram.
    ///
    /// # Errors
    ///
    /// Returns an error if the histogram cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let hist = Histogram::<u64>::new_with_bounds(
            HISTOGRAM_LOWEST_US,
            HISTOGRAM_HIGHEST_US,
            SIGNIFICANT_DIGITS,
        )
        .map_err(|err| MetricsError::Histogram {
            context: "create",
            source: Box::new(err),
        })?;
        Ok(Self { hist })
    }

    /// Record a latency in microseconds, clamping to the trackable range.
    pub fn record(&mut self, latency_us: u64) {
        self.hist
            .saturating_record(latency_us.clamp(HISTOGRAM_LOWEST_US, HISTOGRAM_HIGHEST_US));
    }

    #[must_use]
    pub fn percentiles(&self) -> Percentiles {
        if self.count() == 0 {
            return Percentiles::default();
        }

        Percentiles {
            p50: self.hist.value_at_quantile(0.5),
            p90: self.hist.value_at_quantile(0.9),
            p95: self.hist.value_at_quantile(0.95),
            p99: self.hist.value_at_quantile(0.99),
        }
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.hist.len()
    }

    /// Number of counter slots backing the histogram.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn footprint(&self) -> usize {
        self.hist.distinct_values()
    }

    /// Encode the histogram as base64.
    ///
    /// # Errors
    ///
    /// Returns an error if the histogram cannot be serialized.
    pub fn encode_base64(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        V2Serializer::new()
            .serialize(&self.hist, &mut buffer)
            .map_err(|err| MetricsError::Histogram {
                context: "serialize",
                source: Box::new(err),
            })?;
        Ok(B64.encode(buffer))
    }

    /// Decode a base64 histogram payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be decoded or deserialized.
    pub fn decode_base64(encoded: &str) -> Result<Self, MetricsError> {
        let bytes = B64
            .decode(encoded.as_bytes())
            .map_err(|err| MetricsError::HistogramDecode { source: err })?;
        let mut cursor = Cursor::new(bytes);
        let hist: Histogram<u64> =
            Deserializer::new()
                .deserialize(&mut cursor)
                .map_err(|err| MetricsError::Histogram {
                    context: "deserialize",
                    source: Box::new(err),
                })?;
        Ok(Self { hist })
    }
}
