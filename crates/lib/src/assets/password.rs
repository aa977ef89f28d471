use async_trait::async_trait;
use rand::Rng;
use rand::distr::Alphanumeric;

use crate::asset::{Asset, AssetError, AssetState, BuildContext, File, FileFetcher, Parents};
use crate::util::hash::{ContentHash, hash_bytes};

use super::AssetKind;

pub const PASSWORD_FILENAME: &str = "auth/kubeadmin-password";

const GROUPS: usize = 4;
const GROUP_LEN: usize = 5;

/// The generated `kubeadmin` password.
#[derive(Clone, PartialEq, Eq)]
pub struct KubeadminPassword {
  pub password: String,
}

impl KubeadminPassword {
  /// Digest stored in the cluster instead of the password itself.
  pub fn hash(&self) -> ContentHash {
    hash_bytes(self.password.as_bytes())
  }
}

impl std::fmt::Debug for KubeadminPassword {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("KubeadminPassword").field("password", &"<redacted>").finish()
  }
}

impl AssetState for KubeadminPassword {
  fn files(&self) -> Vec<File> {
    vec![File::new(PASSWORD_FILENAME, self.password.as_str())]
  }
}

/// `xxxxx-xxxxx-xxxxx-xxxxx`, alphanumeric.
fn generate_password() -> String {
  let mut rng = rand::rng();
  (0..GROUPS)
    .map(|_| (0..GROUP_LEN).map(|_| rng.sample(Alphanumeric) as char).collect::<String>())
    .collect::<Vec<_>>()
    .join("-")
}

pub struct KubeadminPasswordAsset;

#[async_trait]
impl Asset<AssetKind> for KubeadminPasswordAsset {
  type State = KubeadminPassword;

  fn kind(&self) -> AssetKind {
    AssetKind::KubeadminPassword
  }

  fn name(&self) -> &'static str {
    "Kubeadmin Password"
  }

  async fn generate(&self, _ctx: &BuildContext, _parents: &Parents<AssetKind>) -> Result<Self::State, AssetError> {
    Ok(KubeadminPassword {
      password: generate_password(),
    })
  }

  fn load(&self, fetcher: &dyn FileFetcher) -> Result<Option<Self::State>, AssetError> {
    let Some(file) = fetcher.fetch_by_name(PASSWORD_FILENAME)? else {
      return Ok(None);
    };
    let password = file
      .text()
      .ok_or_else(|| AssetError::decode(PASSWORD_FILENAME, "not valid UTF-8"))?
      .to_string();
    if password.trim().is_empty() {
      return Err(AssetError::validation(PASSWORD_FILENAME, "password is empty"));
    }
    Ok(Some(KubeadminPassword { password }))
  }
}

#[cfg(test)]
mod tests {
  use crate::asset::MemoryFetcher;

  use super::*;

  #[test]
  fn password_has_four_groups_of_five() {
    let password = generate_password();
    let groups: Vec<&str> = password.split('-').collect();
    assert_eq!(groups.len(), GROUPS);
    assert!(groups.iter().all(|g| g.len() == GROUP_LEN && g.chars().all(|c| c.is_ascii_alphanumeric())));
  }

  #[test]
  fn debug_redacts_password() {
    let state = KubeadminPassword {
      password: "abcde-fghij".into(),
    };
    assert!(!format!("{state:?}").contains("abcde"));
  }

  #[tokio::test]
  async fn round_trips_through_fetcher() {
    let generated = KubeadminPasswordAsset
      .generate(&BuildContext::new(), &Parents::new())
      .await
      .unwrap();
    let fetcher: MemoryFetcher = generated.files().into_iter().collect();

    let loaded = KubeadminPasswordAsset.load(&fetcher).unwrap().unwrap();
    assert_eq!(loaded, generated);
    assert_eq!(loaded.hash(), generated.hash());
  }

  #[test]
  fn empty_file_fails_load() {
    let fetcher: MemoryFetcher = [File::new(PASSWORD_FILENAME, "  ")].into_iter().collect();
    assert!(matches!(
      KubeadminPasswordAsset.load(&fetcher),
      Err(AssetError::Validation { .. })
    ));
  }
}
