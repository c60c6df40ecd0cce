//! Digest authentication against server-shaped challenges

use emvoip_sip_core::{DigestChallenge, DigestCredentials, Method, RequestBuilder, SipMessage};

/// Asterisk-style challenge with unquoted algorithm and stale flag
#[test]
fn parses_a_pbx_challenge_and_answers_it() {
    let response = "SIP/2.0 401 Unauthorized\r\n\
                    Via: SIP/2.0/UDP 192.168.1.40:5060;branch=z9hG4bK1;received=192.168.1.40\r\n\
                    From: <sip:200@pbx.lan>;tag=a\r\n\
                    To: <sip:200@pbx.lan>;tag=as58f4201b\r\n\
                    Call-ID: 4211@pbx.lan\r\n\
                    CSeq: 1 REGISTER\r\n\
                    WWW-Authenticate: Digest algorithm=MD5, realm=\"asterisk\", nonce=\"4b5ceb46\"\r\n\
                    Content-Length: 0\r\n\
                    \r\n";

    let message = SipMessage::parse(response).unwrap();
    assert_eq!(message.status_code(), Some(401));
    assert_eq!(message.cseq().unwrap().1, "REGISTER");

    let header = message.header("WWW-Authenticate").unwrap();
    let challenge = DigestChallenge::parse(header).unwrap();
    assert_eq!(challenge.realm, "asterisk");
    assert_eq!(challenge.nonce, "4b5ceb46");
    assert!(!challenge.stale);

    let credentials = DigestCredentials::compute(
        &challenge,
        Method::Register.as_str(),
        "sip:pbx.lan",
        "200",
        "secret",
        false,
    );

    // the authorized REGISTER round-trips through the parser
    let register = RequestBuilder::new(Method::Register, "sip:pbx.lan")
        .via("192.168.1.40", 5060, "z9hG4bK2")
        .max_forwards(70)
        .from("sip:200@pbx.lan", "b")
        .to("sip:200@pbx.lan", None)
        .call_id("4211@pbx.lan")
        .cseq(2, Method::Register)
        .contact("sip:200@192.168.1.40:5060")
        .expires(3600)
        .header("Authorization", &credentials.authorization_value())
        .build();

    let parsed = SipMessage::parse(&register).unwrap();
    let authorization = parsed.header("Authorization").unwrap();
    assert!(authorization.starts_with("Digest username=\"200\""));
    assert!(authorization.contains("realm=\"asterisk\""));
    assert!(authorization.contains("nonce=\"4b5ceb46\""));
    assert!(authorization.contains("uri=\"sip:pbx.lan\""));
    assert!(authorization.contains(&format!("response=\"{}\"", credentials.response)));
}

/// The same challenge answered twice yields the same response without qop,
/// but differing cnonces (and so responses) with qop enabled
#[test]
fn qop_responses_vary_by_cnonce() {
    let challenge =
        DigestChallenge::parse("Digest realm=\"asterisk\", nonce=\"4b5ceb46\", qop=\"auth\"")
            .unwrap();

    let plain_a =
        DigestCredentials::compute(&challenge, "REGISTER", "sip:pbx.lan", "200", "pw", false);
    let plain_b =
        DigestCredentials::compute(&challenge, "REGISTER", "sip:pbx.lan", "200", "pw", false);
    assert_eq!(plain_a.response, plain_b.response);

    let qop_a =
        DigestCredentials::compute(&challenge, "REGISTER", "sip:pbx.lan", "200", "pw", true);
    let qop_b =
        DigestCredentials::compute(&challenge, "REGISTER", "sip:pbx.lan", "200", "pw", true);
    assert_ne!(qop_a.cnonce, qop_b.cnonce);
    assert_ne!(qop_a.response, qop_b.response);
}
