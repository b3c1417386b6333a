#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::error::validate_alias;
    use crate::telemetry::*;
    use crate::types::*;

    #[test]
    fn service_state_matrix() {
        // not installed, or installation unknown → unknown
        assert_eq!(service_state(Some(false), Some(30), 10), None);
        assert_eq!(service_state(None, Some(30), 10), None);
        // installed but no usable foreground data → unknown
        assert_eq!(service_state(Some(true), None, 10), None);
        assert_eq!(service_state(Some(true), Some(-1), 10), None);
        // within threshold (inclusive) → up
        assert_eq!(service_state(Some(true), Some(0), 10), Some(true));
        assert_eq!(service_state(Some(true), Some(600), 10), Some(true));
        // beyond threshold → down
        assert_eq!(service_state(Some(true), Some(601), 10), Some(false));
    }

    #[test]
    fn unity_state_uses_fixed_threshold() {
        assert_eq!(unity_state(Some(true), Some(600)), Some(true));
        assert_eq!(unity_state(Some(true), Some(601)), Some(false));
        assert_eq!(unity_state(Some(false), Some(1)), None);
    }

    #[test]
    fn bucket_floor_and_end() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let start = bucket_start(ts, 10);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 50).unwrap());
        assert_eq!(
            bucket_end(ts, 10),
            Utc.with_ymd_and_hms(2026, 3, 14, 9, 27, 0).unwrap()
        );
        // a timestamp on the boundary is its own bucket start
        assert_eq!(bucket_start(start, 10), start);
    }

    #[test]
    fn bulk_correlation_id_shape() {
        let exec = ExecId::new("e-77");
        let dev = DeviceId::new("d-42");
        assert_eq!(bulk_correlation_id(&exec, &dev), "e-77-d-42");
    }

    #[test]
    fn effective_monitoring_prefers_device_overrides() {
        let defaults = MonitoringDefaults {
            enabled: true,
            package: "com.example.speed".into(),
            app_name: "Speed".into(),
            threshold_min: 10,
        };
        let overrides = MonitoringOverrides {
            monitor_enabled: false,
            monitored_package: "com.example.other".into(),
            monitored_app_name: "Other".into(),
            monitored_threshold_min: 5,
            monitoring_use_defaults: false,
        };

        let eff = EffectiveMonitoring::resolve(&overrides, &defaults);
        assert!(!eff.enabled);
        assert_eq!(eff.package, "com.example.other");
        assert_eq!(eff.threshold_min, 5);
        assert_eq!(eff.source, MonitoringSource::Device);
    }

    #[test]
    fn effective_monitoring_falls_back_to_defaults() {
        let defaults = MonitoringDefaults {
            enabled: true,
            package: "com.example.speed".into(),
            app_name: "Speed".into(),
            threshold_min: 10,
        };
        let overrides = MonitoringOverrides {
            monitor_enabled: false,
            monitored_package: "ignored".into(),
            monitored_app_name: "ignored".into(),
            monitored_threshold_min: 1,
            monitoring_use_defaults: true,
        };

        let eff = EffectiveMonitoring::resolve(&overrides, &defaults);
        assert!(eff.enabled);
        assert_eq!(eff.package, "com.example.speed");
        assert_eq!(eff.source, MonitoringSource::Defaults);
    }

    #[test]
    fn alias_bounds() {
        assert!(validate_alias("").is_err());
        assert!(validate_alias("k").is_ok());
        assert!(validate_alias(&"a".repeat(200)).is_ok());
        assert!(validate_alias(&"a".repeat(201)).is_err());
    }

    #[test]
    fn action_route_parsing() {
        assert_eq!(CommandAction::from_route("ping"), Some(CommandAction::Ping));
        assert_eq!(
            CommandAction::from_route("launch_app"),
            Some(CommandAction::LaunchApp)
        );
        // remote exec is not dispatchable through the per-device command route
        assert_eq!(CommandAction::from_route("remote_exec_fcm"), None);
        assert_eq!(CommandAction::from_route("nope"), None);
    }

    #[test]
    fn payload_ram_and_installed_helpers() {
        let mut payload = HeartbeatPayload::default();
        payload.memory = Some(MemoryInfo {
            total_ram_mb: Some(4096),
            avail_ram_mb: Some(1024),
        });
        payload.app_versions.insert(
            "com.example.app".into(),
            AppVersionInfo { installed: true, version_name: Some("1.2".into()) },
        );

        assert_eq!(payload.ram_used_mb(), Some(3072));
        assert_eq!(payload.installed("com.example.app"), Some(true));
        assert_eq!(payload.installed("com.missing"), None);
    }

    #[test]
    fn payload_ignores_unknown_fields() {
        let raw = r#"{"battery":{"pct":80},"flux_capacitor":true}"#;
        let payload: HeartbeatPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.battery.unwrap().pct, Some(80));
    }
}
