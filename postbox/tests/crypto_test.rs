use postbox::crypto::{decrypt_maybe_legacy, decrypt_strict, encrypt, EncryptionKey};

fn key(byte: u8) -> EncryptionKey {
    EncryptionKey::try_from(&[byte; 32][..]).unwrap()
}

#[tokio::test]
async fn encrypt_then_decrypt() {
    let key = key(1);
    let sealed = encrypt(key.clone(), "smtp-password".into()).await.unwrap();
    assert_ne!(sealed, "smtp-password");

    let opened = decrypt_strict(key, sealed).await.unwrap();
    assert_eq!(opened, "smtp-password");
}

#[tokio::test]
async fn every_seal_uses_a_fresh_nonce() {
    let key = key(1);
    let a = encrypt(key.clone(), "same".into()).await.unwrap();
    let b = encrypt(key, "same".into()).await.unwrap();
    assert_ne!(a, b);
}

#[tokio::test]
async fn wrong_key_fails_strict_decryption() {
    let sealed = encrypt(key(1), "secret".into()).await.unwrap();
    assert!(decrypt_strict(key(2), sealed).await.is_err());
}

#[tokio::test]
async fn tampered_ciphertext_fails_strict_decryption() {
    let key = key(3);
    let sealed = encrypt(key.clone(), "secret".into()).await.unwrap();

    let mut chars: Vec<char> = sealed.chars().collect();
    let mid = chars.len() / 2;
    chars[mid] = if chars[mid] == 'A' { 'B' } else { 'A' };
    let tampered: String = chars.into_iter().collect();

    assert!(decrypt_strict(key, tampered).await.is_err());
}

#[tokio::test]
async fn legacy_plaintext_is_returned_as_is() {
    let key = key(4);
    let value = decrypt_maybe_legacy(key.clone(), "lead@acme.io".into())
        .await
        .unwrap();
    assert_eq!(value, "lead@acme.io");

    assert!(decrypt_strict(key, "lead@acme.io".into()).await.is_err());
}

#[test]
fn rejects_short_keys() {
    assert!(EncryptionKey::try_from(&[0u8; 8][..]).is_err());
    assert!(EncryptionKey::try_from_base64("not base64!").is_err());
}
