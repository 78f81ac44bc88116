use glowd::dns::build_response;

/// Encode one standard query for `name` (dotted form) with the given
/// record type.
fn query(txid: u16, name: &str, qtype: u16) -> Vec<u8> {
    let mut req = Vec::new();
    req.extend_from_slice(&txid.to_be_bytes());
    req.extend_from_slice(&[0x01, 0x00]); // recursion desired
    req.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0]); // one question
    for label in name.split('.') {
        req.push(label.len() as u8);
        req.extend_from_slice(label.as_bytes());
    }
    req.push(0);
    req.extend_from_slice(&qtype.to_be_bytes());
    req.extend_from_slice(&[0, 1]); // class IN
    req
}

#[test]
fn test_probe_domain_gets_device_address() {
    let req = query(0xbeef, "connectivitycheck.gstatic.com", 1);
    let resp = build_response(&req).unwrap();

    assert_eq!(&resp[..2], &0xbeefu16.to_be_bytes());
    assert_eq!(resp[2], 0x81);
    assert_eq!(resp[3] & 0x0f, 0, "probe answers carry no error code");
    assert_eq!(&resp[6..8], &[0, 1], "exactly one answer record");
    // The answer names the question by pointer and always carries the
    // access-point address.
    assert_eq!(resp.len(), req.len() + 16);
    assert_eq!(&resp[req.len()..req.len() + 2], b"\xc0\x0c");
    assert_eq!(&resp[resp.len() - 4..], &[192, 168, 4, 1]);
}

#[test]
fn test_every_probe_domain_is_recognized() {
    for name in [
        "connectivitycheck.gstatic.com",
        "connectivitycheck.android.com",
        "clients3.google.com",
        "clients1.google.com",
        "clients.l.google.com",
        "captive.apple.com",
        "camp",
    ] {
        let resp = build_response(&query(1, name, 1)).unwrap();
        assert_eq!(&resp[6..8], &[0, 1], "{name} should be answered");
    }
}

#[test]
fn test_unknown_domain_is_refused_without_answers() {
    let req = query(7, "example.com", 1);
    let resp = build_response(&req).unwrap();
    assert_eq!(resp[3] & 0x0f, 9);
    assert_eq!(&resp[6..8], &[0, 0]);
    assert_eq!(resp.len(), req.len(), "no records appended");
}

#[test]
fn test_probe_name_must_end_the_question() {
    // Known probe as a prefix of a longer name must not match.
    let resp = build_response(&query(7, "captive.apple.com.evil", 1)).unwrap();
    assert_eq!(resp[3] & 0x0f, 9);
    assert_eq!(&resp[6..8], &[0, 0]);
}

#[test]
fn test_non_a_query_is_not_implemented() {
    let resp = build_response(&query(7, "captive.apple.com", 28)).unwrap();
    assert_eq!(resp[3] & 0x0f, 4);
    assert_eq!(&resp[6..8], &[0, 0]);
}

#[test]
fn test_response_datagram_is_not_implemented() {
    let mut req = query(7, "captive.apple.com", 1);
    req[2] |= 0x80; // already a response
    let resp = build_response(&req).unwrap();
    assert_eq!(resp[3] & 0x0f, 4);
}

#[test]
fn test_runt_datagram_is_dropped() {
    assert!(build_response(&[0u8; 16]).is_none());
    assert!(build_response(b"").is_none());
}

#[test]
fn test_unterminated_name_is_dropped() {
    let mut req = query(7, "captive.apple.com", 1);
    let terminator = req.len() - 5;
    req.truncate(terminator); // cut right before the name terminator
    req.extend_from_slice(&[b'x'; 2]);
    assert!(build_response(&req).is_none());
}
