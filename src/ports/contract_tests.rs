#[macro_export]
macro_rules! contract_tests_for {
      (
          $mod_name:ident,
          make = $make:expr,
          attr = #[$meta:meta],
          tests = {
            $( $test_name:ident => $tmpl:path ),+ $(,)?
        }
      ) => {
          mod $mod_name {
              use super::*;

              $(
                  #[test]
                  #[$meta]
                  fn $test_name() {
                      let driver = ($make)();
                      $tmpl(driver);
                  }
              )+
          }
      };
      (
          $mod_name:ident,
          make = $make:expr,
          tests = {
            $( $test_name:ident => $tmpl:path ),+ $(,)?
        }
      ) => {
          $crate::contract_tests_for!(
              $mod_name,
              make = $make,
              attr = #[allow(unused)],
              tests = { $( $test_name => $tmpl ),+ }
          );
      };
  }

pub mod token_contract {
    use std::time::{SystemTime, UNIX_EPOCH};

    use zeroize::Zeroizing;

    use crate::error::ErrorKind;
    use crate::model::{ObjectAttribute, ObjectClass, Pin, SessionMode, UserRole};
    use crate::ports::{TokenDriver, TokenSession};

    pub(crate) const SO_PIN: &str = "87654321";
    pub(crate) const USER_PIN: &str = "1234";

    fn unique_label() -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or_default();
        format!("contract-{}-{}", std::process::id(), nanos)
    }

    fn data_template(label: &str) -> Vec<ObjectAttribute> {
        vec![
            ObjectAttribute::Class(ObjectClass::Data),
            ObjectAttribute::Token(true),
            ObjectAttribute::Private(true),
            ObjectAttribute::Label(label.as_bytes().to_vec()),
        ]
    }

    /// Claim a free slot and give it a user PIN
    fn initialized_slot<D: TokenDriver>(driver: &D, label: &str) -> D::Slot {
        let slot = driver
            .slots()
            .expect("slot enumeration failed")
            .into_iter()
            .find(|info| !info.initialized)
            .expect("no uninitialized slot")
            .slot;

        let so_pin = Pin::from_str(SO_PIN).unwrap();
        driver.init_token(slot, &so_pin, label).expect("init_token failed");

        let mut session = driver.open_session(slot, SessionMode::ReadWrite).unwrap();
        session.login(UserRole::SecurityOfficer, &so_pin).unwrap();
        session.init_pin(&Pin::from_str(USER_PIN).unwrap()).unwrap();
        session.logout().unwrap();
        slot
    }

    pub(crate) fn test_init_token_sets_label(driver: impl TokenDriver) {
        let label = unique_label();
        initialized_slot(&driver, &label);

        let matching: Vec<_> = driver
            .slots()
            .unwrap()
            .into_iter()
            .filter(|info| info.label == label)
            .collect();
        assert_eq!(matching.len(), 1);
        assert!(matching[0].initialized);
    }

    pub(crate) fn test_user_login_after_init_pin(driver: impl TokenDriver) {
        let slot = initialized_slot(&driver, &unique_label());

        let mut session = driver.open_session(slot, SessionMode::ReadOnly).unwrap();
        session
            .login(UserRole::User, &Pin::from_str(USER_PIN).unwrap())
            .expect("user login failed");
        session.logout().expect("logout failed");
    }

    pub(crate) fn test_wrong_pin_rejected(driver: impl TokenDriver) {
        let slot = initialized_slot(&driver, &unique_label());

        let mut session = driver.open_session(slot, SessionMode::ReadOnly).unwrap();
        let err = session
            .login(UserRole::User, &Pin::from_str("99999999").unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthFailed);
    }

    pub(crate) fn test_data_object_roundtrip(driver: impl TokenDriver) {
        let slot = initialized_slot(&driver, &unique_label());
        let user_pin = Pin::from_str(USER_PIN).unwrap();

        let mut session = driver.open_session(slot, SessionMode::ReadWrite).unwrap();
        session.login(UserRole::User, &user_pin).unwrap();

        let mut template = data_template("roundtrip");
        template.push(ObjectAttribute::Modifiable(false));
        template.push(ObjectAttribute::Value(Zeroizing::new(vec![7u8; 64])));
        session.create_object(&template).expect("create_object failed");

        let handles = session.find_objects(&data_template("roundtrip")).unwrap();
        assert_eq!(handles.len(), 1);
        let value = session.read_value(handles[0]).unwrap();
        assert_eq!(&value[..], &[7u8; 64][..]);

        assert!(session
            .find_objects(&data_template("other-label"))
            .unwrap()
            .is_empty());
        session.logout().unwrap();
    }

    pub(crate) fn test_private_objects_hidden_before_login(driver: impl TokenDriver) {
        let slot = initialized_slot(&driver, &unique_label());
        let user_pin = Pin::from_str(USER_PIN).unwrap();

        {
            let mut session = driver.open_session(slot, SessionMode::ReadWrite).unwrap();
            session.login(UserRole::User, &user_pin).unwrap();
            let mut template = data_template("hidden");
            template.push(ObjectAttribute::Value(Zeroizing::new(b"secret".to_vec())));
            session.create_object(&template).unwrap();
            session.logout().unwrap();
        }

        let mut session = driver.open_session(slot, SessionMode::ReadOnly).unwrap();
        assert!(session
            .find_objects(&data_template("hidden"))
            .unwrap()
            .is_empty());
    }
}
