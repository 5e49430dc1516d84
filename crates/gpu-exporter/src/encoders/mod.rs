use std::collections::BTreeMap;

use crate::sample::Sample;

pub mod influx;
pub mod json;

pub type Tags<'a> = BTreeMap<&'a str, &'a str>;
pub type Fields<'a> = BTreeMap<&'a str, f64>;

/// Trait for encoding metrics data into different formats
pub trait MetricsEncoder: Send + Sync {
    /// Encode metrics with measurement name, tags, fields, and timestamp
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &Tags<'_>,
        fields: &Fields<'_>,
        timestamp: i64,
    ) -> String;

    /// Encode one sample: labels become tags and the value a `value` field.
    fn encode_sample(&self, sample: &Sample, timestamp: i64) -> String {
        let tags: Tags<'_> = sample.labels().collect();
        let fields: Fields<'_> = BTreeMap::from([("value", sample.value)]);

        self.encode_metrics(sample.name(), &tags, &fields, timestamp)
    }
}

/// Factory function to create encoders based on format string
pub fn create_encoder(format: &str) -> Box<dyn MetricsEncoder> {
    match format.to_lowercase().as_str() {
        "json" => Box::new(json::JsonEncoder::new()),
        _ => Box::new(influx::InfluxEncoder::new()),
    }
}
