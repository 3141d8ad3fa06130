use craft_scan_rs::ports::{load_ports_from_path, parse_ports_str, DEFAULT_PORTS};

#[test]
fn parse_single_and_ranges_and_comments() {
    let input = r#"
        # default instance
        25565
        25570  # creative
        19132, 25565
        25580-25582
        25581  # duplicate
        # blank line follows

    "#;

    let ports = parse_ports_str(input).expect("parse ok");
    // Dedup, first appearance wins
    assert_eq!(ports, vec![25565, 25570, 19132, 25580, 25581, 25582]);
}

#[test]
fn invalid_port_rejected() {
    assert!(parse_ports_str("0\n").is_err());
    assert!(parse_ports_str("25565-abc").is_err());
}

#[test]
fn ports_file_is_loaded() {
    let path = std::env::temp_dir().join(format!("craft-scan-ports-{}.txt", std::process::id()));
    std::fs::write(&path, "25565\n25566-25567\n").unwrap();
    let ports = load_ports_from_path(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(ports, vec![25565, 25566, 25567]);
}

#[test]
fn missing_ports_file_errors() {
    assert!(load_ports_from_path("/nonexistent/craft-scan/ports.txt").is_err());
}

#[test]
fn default_list_is_contiguous() {
    assert!(DEFAULT_PORTS.windows(2).all(|w| w[1] == w[0] + 1));
}
