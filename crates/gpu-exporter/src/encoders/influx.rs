use influxdb_line_protocol::LineProtocolBuilder;

use super::Fields;
use super::MetricsEncoder;
use super::Tags;

/// InfluxDB line protocol encoder
pub struct InfluxEncoder;

impl InfluxEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for InfluxEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsEncoder for InfluxEncoder {
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &Tags<'_>,
        fields: &Fields<'_>,
        timestamp: i64,
    ) -> String {
        let mut builder = LineProtocolBuilder::new().measurement(measurement);

        for (key, value) in tags {
            builder = builder.tag(key, value);
        }

        // the first field moves the builder into its after-field state
        let mut field_entries = fields.iter();
        let line = match field_entries.next() {
            Some((first_key, first_value)) => {
                let mut after_first_field = builder.field(first_key, *first_value);
                for (key, value) in field_entries {
                    after_first_field = after_first_field.field(key, *value);
                }
                after_first_field.timestamp(timestamp).close_line().build()
            }
            None => builder
                .field("_empty", true)
                .timestamp(timestamp)
                .close_line()
                .build(),
        };

        String::from_utf8_lossy(&line).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::schema::MetricKey;
    use crate::schema::MetricSchema;

    #[test]
    fn test_encode_metrics_basic() {
        let encoder = InfluxEncoder::new();
        let tags = BTreeMap::from([("minor_number", "0"), ("uuid", "GPU-1")]);
        let fields = BTreeMap::from([("value", 85.5)]);

        let result =
            encoder.encode_metrics("nvidia_power_usage", &tags, &fields, 1609459200000000000);

        assert_eq!(
            result,
            "nvidia_power_usage,minor_number=0,uuid=GPU-1 value=85.5 1609459200000000000\n"
        );
    }

    #[test]
    fn test_encode_metrics_no_tags() {
        let encoder = InfluxEncoder::new();
        let tags = BTreeMap::new();
        let fields = BTreeMap::from([("value", 2.0)]);

        let result =
            encoder.encode_metrics("nvidia_device_count", &tags, &fields, 1234567890000000000);

        assert!(result.starts_with("nvidia_device_count "));
        assert!(result.contains("value=2"));
        assert!(!result.contains(','));
    }

    #[test]
    fn test_encode_metrics_empty_fields() {
        let encoder = InfluxEncoder::new();
        let tags = BTreeMap::from([("uuid", "GPU-1")]);
        let fields = BTreeMap::new();

        let result = encoder.encode_metrics("empty_fields", &tags, &fields, 1234567890000000000);

        assert!(result.starts_with("empty_fields,uuid=GPU-1"));
        assert!(result.contains("_empty=true"));
    }

    #[test]
    fn test_tag_values_with_spaces_are_escaped() {
        let encoder = InfluxEncoder::new();
        let sample = MetricSchema::default().sample(
            MetricKey::Temperature,
            vec!["1".to_string(), "GPU-2".to_string(), "NVIDIA A10".to_string()],
            55.0,
        );

        let result = encoder.encode_sample(&sample, 1);

        assert!(result.contains("name=NVIDIA\\ A10"));
        assert!(result.contains("value=55"));
    }

    #[test]
    fn test_field_ordering_consistency() {
        let encoder = InfluxEncoder::new();
        let tags = BTreeMap::from([("service", "test")]);
        let fields = BTreeMap::from([("z_field", 1.0), ("a_field", 2.0), ("m_field", 3.0)]);

        let result = encoder.encode_metrics("test_ordering", &tags, &fields, 1234567890000000000);

        assert_eq!(
            result,
            "test_ordering,service=test a_field=2,m_field=3,z_field=1 1234567890000000000\n"
        );
    }
}
