use crate::ebay::gateway::{ApiAuth, Gateway, GatewayError};
use crate::store::{CachedProfile, ProfileAddress};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityUser {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    registration_address: Option<IdentityAddress>,
    #[serde(default)]
    individual_account: Option<IndividualAccount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndividualAccount {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    registration_address: Option<IdentityAddress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityAddress {
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    state_or_province: Option<String>,
    #[serde(default)]
    postal_code: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

impl From<IdentityAddress> for ProfileAddress {
    fn from(address: IdentityAddress) -> Self {
        Self {
            city: address.city,
            state_or_province: address.state_or_province,
            postal_code: address.postal_code,
            country: address.country,
        }
    }
}

impl IdentityUser {
    fn into_profile(self) -> Result<CachedProfile, GatewayError> {
        let username = self
            .username
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| GatewayError::InvalidResponse("identity response without username".into()))?;
        let (fallback_email, fallback_address) = match self.individual_account {
            Some(account) => (account.email, account.registration_address),
            None => (None, None),
        };
        Ok(CachedProfile {
            user_id: self.user_id,
            username,
            email: self.email.or(fallback_email),
            registration_address: self
                .registration_address
                .or(fallback_address)
                .map(ProfileAddress::from),
        })
    }
}

pub async fn fetch_profile(
    gateway: &Gateway,
    identity_root: &str,
    access_token: &str,
) -> Result<CachedProfile, GatewayError> {
    let url = format!("{identity_root}/commerce/identity/v1/user/");
    let request = gateway.http().get(url);
    let user: IdentityUser = gateway
        .send_json("identity.user", request, ApiAuth::Bearer(access_token))
        .await?;
    user.into_profile()
}
