use serde_json::json;

use super::Fields;
use super::MetricsEncoder;
use super::Tags;
use crate::sample::Sample;

/// JSON encoder for metrics
pub struct JsonEncoder;

impl JsonEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JsonEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn json_number(value: f64) -> serde_json::Value {
    serde_json::Number::from_f64(value)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

impl MetricsEncoder for JsonEncoder {
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &Tags<'_>,
        fields: &Fields<'_>,
        timestamp: i64,
    ) -> String {
        let json_fields: serde_json::Map<String, serde_json::Value> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), json_number(*v)))
            .collect();

        let metrics = json!({
            "measure": measurement,
            "ts": timestamp,
            "tag": tags,
            "field": json_fields,
        });
        metrics.to_string() + "\n"
    }

    fn encode_sample(&self, sample: &Sample, timestamp: i64) -> String {
        let tags: Tags<'_> = sample.labels().collect();

        let metrics = json!({
            "measure": sample.name(),
            "kind": sample.kind(),
            "ts": timestamp,
            "tag": tags,
            "field": { "value": json_number(sample.value) },
        });
        metrics.to_string() + "\n"
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::Value;

    use super::*;
    use crate::schema::MetricKey;
    use crate::schema::MetricSchema;

    #[test]
    fn test_encode_metrics_basic() {
        let encoder = JsonEncoder::new();
        let tags = BTreeMap::from([("minor_number", "0"), ("uuid", "GPU-1")]);
        let fields = BTreeMap::from([("value", 85.5)]);

        let result = encoder.encode_metrics("nvidia_power_usage", &tags, &fields, 1609459200);
        let parsed: Value = serde_json::from_str(&result).expect("Should be valid JSON");

        assert_eq!(parsed["measure"], "nvidia_power_usage");
        assert_eq!(parsed["ts"], 1609459200);
        assert_eq!(parsed["tag"]["minor_number"], "0");
        assert_eq!(parsed["tag"]["uuid"], "GPU-1");
        assert_eq!(parsed["field"]["value"], 85.5);
    }

    #[test]
    fn test_encode_metrics_empty_tags() {
        let encoder = JsonEncoder::new();
        let tags = BTreeMap::new();
        let fields = BTreeMap::from([("value", 42.0)]);

        let result = encoder.encode_metrics("test_metric", &tags, &fields, 1234567890);
        let parsed: Value = serde_json::from_str(&result).expect("Should be valid JSON");

        assert!(parsed["tag"].as_object().expect("tag object").is_empty());
        assert_eq!(parsed["field"]["value"], 42.0);
    }

    #[test]
    fn test_non_finite_values_become_null() {
        let encoder = JsonEncoder::new();
        let fields = BTreeMap::from([("value", f64::NAN)]);

        let result = encoder.encode_metrics("nan_metric", &BTreeMap::new(), &fields, 1);
        let parsed: Value = serde_json::from_str(&result).expect("Should be valid JSON");

        assert_eq!(parsed["field"]["value"], Value::Null);
    }

    #[test]
    fn test_encode_sample_includes_kind() {
        let encoder = JsonEncoder::new();
        let sample = MetricSchema::default().sample(MetricKey::DeviceCount, Vec::new(), 4.0);

        let result = encoder.encode_sample(&sample, 1609459200);
        let parsed: Value = serde_json::from_str(&result).expect("Should be valid JSON");

        assert_eq!(parsed["measure"], "nvidia_device_count");
        assert_eq!(parsed["kind"], "counter");
        assert_eq!(parsed["field"]["value"], 4.0);
        assert!(result.ends_with('\n'));
    }

    #[test]
    fn test_encode_process_sample() {
        let encoder = JsonEncoder::new();
        let sample = MetricSchema::default().sample(
            MetricKey::ProcessInfo,
            vec!["1".to_string(), "4242".to_string(), "python3".to_string()],
            1048576.0,
        );

        let parsed: Value =
            serde_json::from_str(&encoder.encode_sample(&sample, 1)).expect("Should be valid JSON");

        assert_eq!(parsed["kind"], "gauge");
        assert_eq!(parsed["tag"]["pid"], "4242");
        assert_eq!(parsed["tag"]["process_name"], "python3");
        assert_eq!(parsed["field"]["value"], 1048576.0);
    }
}
