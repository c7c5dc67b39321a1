//! Hand-written `prost` definitions for the subset of the WhatsApp protobuf
//! schema the handshake needs, plus the client payload builders.

use md5::{Digest, Md5};
use prost::Message;
use thiserror::Error;

use crate::auth::AuthenticationCreds;
use crate::config::SocketConfig;

#[derive(Clone, PartialEq, Message)]
pub struct HandshakeMessage {
    #[prost(message, optional, tag = "2")]
    pub client_hello: Option<ClientHello>,
    #[prost(message, optional, tag = "3")]
    pub server_hello: Option<ServerHello>,
    #[prost(message, optional, tag = "4")]
    pub client_finish: Option<ClientFinish>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientHello {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub ephemeral: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ServerHello {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub ephemeral: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub r#static: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub payload: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientFinish {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub r#static: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub payload: Option<Vec<u8>>,
}

/// Sent encrypted in the last handshake message.
#[derive(Clone, PartialEq, Message)]
pub struct ClientPayload {
    #[prost(uint64, optional, tag = "1")]
    pub username: Option<u64>,
    #[prost(bool, optional, tag = "3")]
    pub passive: Option<bool>,
    #[prost(message, optional, tag = "5")]
    pub user_agent: Option<UserAgent>,
    #[prost(message, optional, tag = "6")]
    pub web_info: Option<WebInfo>,
    #[prost(string, optional, tag = "7")]
    pub push_name: Option<String>,
    #[prost(int32, optional, tag = "12")]
    pub connect_type: Option<i32>,
    #[prost(int32, optional, tag = "13")]
    pub connect_reason: Option<i32>,
    #[prost(uint32, optional, tag = "18")]
    pub device: Option<u32>,
    #[prost(message, optional, tag = "19")]
    pub device_pairing_data: Option<DevicePairingRegistrationData>,
    #[prost(bool, optional, tag = "33")]
    pub pull: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct UserAgent {
    #[prost(int32, optional, tag = "1")]
    pub platform: Option<i32>,
    #[prost(message, optional, tag = "2")]
    pub app_version: Option<AppVersion>,
    #[prost(string, optional, tag = "3")]
    pub mcc: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub mnc: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub os_version: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub manufacturer: Option<String>,
    #[prost(string, optional, tag = "7")]
    pub device: Option<String>,
    #[prost(string, optional, tag = "8")]
    pub os_build_number: Option<String>,
    #[prost(int32, optional, tag = "10")]
    pub release_channel: Option<i32>,
    #[prost(string, optional, tag = "11")]
    pub locale_language_iso_639_1: Option<String>,
    #[prost(string, optional, tag = "12")]
    pub locale_country_iso_3166_1_alpha_2: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AppVersion {
    #[prost(uint32, optional, tag = "1")]
    pub primary: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub secondary: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub tertiary: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WebInfo {
    #[prost(string, optional, tag = "1")]
    pub ref_token: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub version: Option<String>,
    #[prost(int32, optional, tag = "4")]
    pub web_sub_platform: Option<i32>,
}

/// Registration data for a device that has not paired yet.
#[derive(Clone, PartialEq, Message)]
pub struct DevicePairingRegistrationData {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub e_regid: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub e_keytype: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub e_ident: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub e_skey_id: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub e_skey_val: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "6")]
    pub e_skey_sig: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub build_hash: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "8")]
    pub device_props: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DeviceProps {
    #[prost(string, optional, tag = "1")]
    pub os: Option<String>,
    #[prost(message, optional, tag = "2")]
    pub version: Option<AppVersion>,
    #[prost(int32, optional, tag = "3")]
    pub platform_type: Option<i32>,
    #[prost(bool, optional, tag = "4")]
    pub require_full_sync: Option<bool>,
}

pub mod platform {
    pub const WEB: i32 = 14;
}

pub mod release_channel {
    pub const RELEASE: i32 = 0;
}

pub mod connect_type {
    pub const WIFI_UNKNOWN: i32 = 1;
}

pub mod connect_reason {
    pub const USER_ACTIVATED: i32 = 1;
}

pub mod web_sub_platform {
    pub const WEB_BROWSER: i32 = 0;
}

/// Why a client payload could not be built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("credentials have no account to log in as")]
    NotLoggedIn,
    #[error("invalid account jid {0}")]
    InvalidJid(String),
}

/// `DeviceProps.PlatformType` for a browser name.
pub fn platform_type(browser: &str) -> i32 {
    match browser.to_ascii_lowercase().as_str() {
        "chrome" => 1,
        "firefox" => 2,
        "ie" => 3,
        "opera" => 4,
        "safari" => 5,
        "edge" => 6,
        "desktop" => 7,
        _ => 0,
    }
}

/// Big-endian encoding of the low `len` bytes of `value`.
fn encode_big_endian(value: u32, len: usize) -> Vec<u8> {
    value.to_be_bytes()[4 - len..].to_vec()
}

fn app_version(version: [u32; 3]) -> AppVersion {
    AppVersion {
        primary: Some(version[0]),
        secondary: Some(version[1]),
        tertiary: Some(version[2]),
    }
}

fn base_payload(config: &SocketConfig) -> ClientPayload {
    ClientPayload {
        username: None,
        passive: None,
        user_agent: Some(UserAgent {
            platform: Some(platform::WEB),
            app_version: Some(app_version(config.version)),
            mcc: Some("000".into()),
            mnc: Some("000".into()),
            os_version: Some("0.1".into()),
            manufacturer: None,
            device: Some("Desktop".into()),
            os_build_number: Some("0.1".into()),
            release_channel: Some(release_channel::RELEASE),
            locale_language_iso_639_1: Some("en".into()),
            locale_country_iso_3166_1_alpha_2: Some("US".into()),
        }),
        web_info: Some(WebInfo {
            ref_token: None,
            version: None,
            web_sub_platform: Some(web_sub_platform::WEB_BROWSER),
        }),
        push_name: None,
        connect_type: Some(connect_type::WIFI_UNKNOWN),
        connect_reason: Some(connect_reason::USER_ACTIVATED),
        device: None,
        device_pairing_data: None,
        pull: None,
    }
}

/// Payload for a device that has never paired: carries the identity and
/// signed pre-key the phone will link to.
pub fn make_registration_payload(
    creds: &AuthenticationCreds,
    config: &SocketConfig,
) -> ClientPayload {
    let props = DeviceProps {
        os: Some(config.browser.os.clone()),
        version: Some(AppVersion {
            primary: Some(10),
            secondary: Some(15),
            tertiary: Some(7),
        }),
        platform_type: Some(platform_type(&config.browser.name)),
        require_full_sync: Some(false),
    };
    let signed = &creds.signed_pre_key;

    ClientPayload {
        passive: Some(false),
        pull: Some(false),
        device_pairing_data: Some(DevicePairingRegistrationData {
            e_regid: Some(encode_big_endian(u32::from(creds.registration_id), 4)),
            e_keytype: Some(vec![crate::crypto::KEY_BUNDLE_TYPE]),
            e_ident: Some(creds.signed_identity_key.public.to_vec()),
            e_skey_id: Some(encode_big_endian(signed.key_id, 3)),
            e_skey_val: Some(signed.key_pair.public.to_vec()),
            e_skey_sig: Some(signed.signature.to_vec()),
            build_hash: Some(Md5::digest(config.version_string().as_bytes()).to_vec()),
            device_props: Some(props.encode_to_vec()),
        }),
        ..base_payload(config)
    }
}

/// Payload for a device that is already linked to `creds.me`.
pub fn make_login_payload(
    creds: &AuthenticationCreds,
    config: &SocketConfig,
) -> Result<ClientPayload, PayloadError> {
    let me = creds.me.as_ref().ok_or(PayloadError::NotLoggedIn)?;
    let username = me
        .user()
        .parse()
        .map_err(|_| PayloadError::InvalidJid(me.id.clone()))?;

    Ok(ClientPayload {
        username: Some(username),
        device: Some(me.device()),
        passive: Some(true),
        pull: Some(true),
        ..base_payload(config)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{init_auth_creds, AuthenticationState, Contact, MemoryKeyStore};
    use std::sync::Arc;

    fn config() -> SocketConfig {
        let auth = AuthenticationState::new(init_auth_creds(), Arc::new(MemoryKeyStore::new()));
        SocketConfig::new(auth)
    }

    #[test]
    fn big_endian_widths() {
        assert_eq!(encode_big_endian(0x0102_0304, 4), vec![1, 2, 3, 4]);
        assert_eq!(encode_big_endian(1, 3), vec![0, 0, 1]);
    }

    #[test]
    fn registration_payload_carries_signed_pre_key() {
        let creds = init_auth_creds();
        let payload = make_registration_payload(&creds, &config());
        let pairing = payload.device_pairing_data.as_ref().unwrap();

        assert_eq!(payload.passive, Some(false));
        assert_eq!(pairing.e_keytype.as_deref(), Some(&[5u8][..]));
        assert_eq!(
            pairing.e_ident.as_deref(),
            Some(&creds.signed_identity_key.public[..])
        );
        assert_eq!(pairing.e_skey_id.as_deref(), Some(&[0u8, 0, 1][..]));
        assert_eq!(
            pairing.e_skey_sig.as_deref(),
            Some(&creds.signed_pre_key.signature[..])
        );
        let build_hash = pairing.build_hash.as_deref().unwrap();
        assert_eq!(build_hash.len(), 16);
        assert_eq!(build_hash, &Md5::digest(b"2.3000.1012170356")[..]);

        let props = DeviceProps::decode(pairing.device_props.as_deref().unwrap()).unwrap();
        assert_eq!(props.os.as_deref(), Some("Ubuntu"));
        assert_eq!(props.platform_type, Some(1));
    }

    #[test]
    fn login_payload_needs_an_account() {
        let mut creds = init_auth_creds();
        assert_eq!(
            make_login_payload(&creds, &config()),
            Err(PayloadError::NotLoggedIn)
        );

        creds.me = Some(Contact {
            id: "15551234567:4@s.whatsapp.net".into(),
            ..Default::default()
        });
        let payload = make_login_payload(&creds, &config()).unwrap();
        assert_eq!(payload.username, Some(15551234567));
        assert_eq!(payload.device, Some(4));
        assert_eq!(payload.passive, Some(true));
        assert!(payload.device_pairing_data.is_none());
    }

    #[test]
    fn payload_survives_the_wire() {
        let payload = make_registration_payload(&init_auth_creds(), &config());
        let decoded = ClientPayload::decode(payload.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(
            decoded.user_agent.unwrap().app_version.unwrap().tertiary,
            Some(1012170356)
        );
    }

    #[test]
    fn non_numeric_account_is_rejected() {
        let mut creds = init_auth_creds();
        creds.me = Some(Contact {
            id: "someone@s.whatsapp.net".into(),
            ..Default::default()
        });
        assert_eq!(
            make_login_payload(&creds, &config()),
            Err(PayloadError::InvalidJid("someone@s.whatsapp.net".into()))
        );
    }

    #[test]
    fn build_hash_follows_the_configured_version() {
        let creds = init_auth_creds();
        let config = config().with_version([2, 2413, 1]);
        let payload = make_registration_payload(&creds, &config);
        assert_eq!(
            payload.device_pairing_data.unwrap().build_hash.unwrap(),
            Md5::digest(b"2.2413.1").to_vec()
        );
    }
}
