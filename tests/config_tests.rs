use photo_booth::config::{CameraDriverConfig, Configuration, IndicatorConfig, TriggerConfig};
use photo_booth::processing::filters::{Filter, FilterChain};
use photo_booth::processing::montage::MontageTemplate;
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn defaults_describe_a_strip_booth() {
    let cfg: Configuration = serde_yaml::from_str("{}").unwrap();
    assert_eq!(cfg.camera.delay, Duration::from_secs(3));
    assert_eq!(cfg.camera.capture_count, None);
    assert_eq!(
        cfg.camera.output_directory,
        PathBuf::from("/tmp/photobooth/captures")
    );
    assert!(matches!(cfg.camera.driver, CameraDriverConfig::Command(_)));
    assert_eq!(cfg.processing.template.name, "strip-with-title");
    assert!(!cfg.printing.enabled);
    assert_eq!(cfg.printing.copies, 1);
    assert!(matches!(cfg.indicator, IndicatorConfig::Log));
    assert!(matches!(cfg.trigger, TriggerConfig::Stdin));
    assert!(cfg.remote.is_none());
    cfg.validated().unwrap();
}

#[test]
fn parse_kebab_case_config() {
    let yaml = r#"
camera:
  delay: 5s
  capture-count: 3
  driver:
    type: simulated
    source-directory: /samples
processing:
  template:
    name: double-strip-with-title
    params:
      margin: 3%
      guide-color: black
  captures:
    correct-orientation: true
    filters:
      - name: grayscale
      - name: level
        params:
          level: 2.5
  title:
    image-path: /srv/title.png
    filters:
      - name: invert
printing:
  enabled: true
  copies: 2
  destination: Canon_SELPHY
  post-print-delay: 30s
indicator:
  type: sysfs
  led: /sys/class/leds/booth
trigger:
  type: evdev
  key: KEY_CAMERA
"#;
    let cfg = serde_yaml::from_str::<Configuration>(yaml)
        .unwrap()
        .validated()
        .unwrap();
    assert_eq!(cfg.camera.delay, Duration::from_secs(5));
    assert!(matches!(
        &cfg.camera.driver,
        CameraDriverConfig::Simulated { source_directory } if source_directory == &PathBuf::from("/samples")
    ));
    let template = MontageTemplate::from_config(&cfg.processing.template).unwrap();
    assert_eq!(template.name(), "double-strip-with-title");
    let chain = FilterChain::from_config(&cfg.processing.captures.filters).unwrap();
    assert_eq!(
        chain.filters(),
        &[Filter::Grayscale, Filter::Level { level: 2.5 }]
    );
    assert!(cfg.processing.captures.correct_orientation);
    assert_eq!(
        cfg.processing.title.as_ref().map(|t| t.image_path.clone()),
        Some(PathBuf::from("/srv/title.png"))
    );
    assert_eq!(cfg.printing.destination.as_deref(), Some("Canon_SELPHY"));
    assert_eq!(cfg.printing.post_print_delay, Duration::from_secs(30));
    assert!(matches!(
        cfg.trigger,
        TriggerConfig::Evdev { device: None, ref key } if key == "KEY_CAMERA"
    ));
}

#[test]
fn later_files_override_earlier_ones() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("config_default.yml");
    let local = dir.path().join("config.yml");
    std::fs::write(
        &base,
        "camera:\n  delay: 3s\n  output-directory: /data/captures\nprinting:\n  copies: 1\n",
    )
    .unwrap();
    std::fs::write(&local, "camera:\n  delay: 1s\nprinting:\n  enabled: true\n").unwrap();

    let cfg = Configuration::from_yaml_files(&[&base, &local]).unwrap();
    assert_eq!(cfg.camera.delay, Duration::from_secs(1));
    assert_eq!(cfg.camera.output_directory, PathBuf::from("/data/captures"));
    assert!(cfg.printing.enabled);
    assert_eq!(cfg.printing.copies, 1);
}

#[test]
fn missing_layers_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let only = dir.path().join("config.yml");
    std::fs::write(&only, "printing:\n  copies: 4\n").unwrap();
    let cfg =
        Configuration::from_yaml_files(&[dir.path().join("absent.yml"), only.clone()]).unwrap();
    assert_eq!(cfg.printing.copies, 4);
}

#[test]
fn validation_rejects_unknown_names() {
    let cfg: Configuration =
        serde_yaml::from_str("processing:\n  template:\n    name: collage\n").unwrap();
    let err = cfg.validated().unwrap_err();
    assert!(format!("{err:#}").contains("collage"));

    let cfg: Configuration =
        serde_yaml::from_str("processing:\n  captures:\n    filters:\n      - name: sepia\n")
            .unwrap();
    let err = cfg.validated().unwrap_err();
    assert!(format!("{err:#}").contains("sepia"));
}

#[test]
fn validation_rejects_capture_count_mismatch() {
    let cfg: Configuration = serde_yaml::from_str("camera:\n  capture-count: 4\n").unwrap();
    let err = cfg.validated().unwrap_err();
    assert!(format!("{err:#}").contains("requires 3 captures"));
}

#[test]
fn validation_rejects_zero_copies() {
    let cfg: Configuration = serde_yaml::from_str("printing:\n  copies: 0\n").unwrap();
    assert!(cfg.validated().is_err());
}

#[test]
fn remote_section_uses_default_delay() {
    let yaml = r#"
remote:
  user: pi
  host: booth.local
  remote-output-directory: /tmp/photobooth/processed
  remote-printed-directory: /tmp/photobooth/printed
  local-fetch-directory: /srv/fetch
  local-printed-directory: /srv/printed
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    let remote = cfg.remote.unwrap();
    assert_eq!(remote.delay, Duration::from_secs(10));
    assert_eq!(remote.connection(), "pi@booth.local");
}
