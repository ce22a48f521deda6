use dtlsproxy::keystore::Keystore;
use std::io::Write;

fn write_psk_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp psk file");
    file.write_all(contents.as_bytes()).expect("write psk file");
    file
}

#[tokio::test]
async fn load_reads_and_parses_file() {
    let file = write_psk_file("client1:0102030405060708090a0b0c0d0e0f10\n");
    let ks = Keystore::load(file.path()).await.expect("load keystore");
    assert_eq!(ks.len(), 1);
    assert!(ks.lookup(b"client1").is_some());
}

#[tokio::test]
async fn load_missing_file_is_startup_error() {
    let result = Keystore::load(std::path::Path::new("/nonexistent/psk.txt")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn load_empty_file_is_an_error() {
    let file = write_psk_file("\n\n# only comments\n");
    let result = Keystore::load(file.path()).await;
    assert!(result.is_err());
}
