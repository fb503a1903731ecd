use postbox::auth::{hash_password, verify_password, AuthError, JwtConfig};
use uuid::Uuid;

const SECRET: &str = "a-test-signing-secret-that-is-long-enough";

#[test]
fn short_signing_secrets_are_rejected() {
    assert!(matches!(
        JwtConfig::new("too-short"),
        Err(AuthError::WeakSecret(9))
    ));
}

#[test]
fn tokens_verify_with_the_same_secret() {
    let jwt = JwtConfig::new(SECRET).unwrap().build();
    let user_id = Uuid::new_v4();

    let token = jwt.generate_token(user_id).unwrap();
    let claims = jwt.verify_token(&token).unwrap();
    assert_eq!(claims.sub, user_id);

    let other = JwtConfig::new("another-signing-secret-of-sufficient-length")
        .unwrap()
        .build();
    assert!(other.verify_token(&token).is_err());
}

#[test]
fn expired_tokens_are_rejected() {
    let jwt = JwtConfig::new(SECRET)
        .unwrap()
        .duration(time::Duration::minutes(-5))
        .build();
    let token = jwt.generate_token(Uuid::new_v4()).unwrap();
    assert!(matches!(
        jwt.verify_token(&token),
        Err(AuthError::Unauthorized)
    ));
}

#[tokio::test]
async fn password_hashing_roundtrip() {
    let password = "secure-password-123".to_string();

    let hash = hash_password(password.clone()).await.unwrap();

    assert!(verify_password(password, hash.clone()).await.is_ok());
    assert!(verify_password("wrong-password".to_string(), hash)
        .await
        .is_err());
}
