// Copyright 2019 CoreOS, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The closed variable and conditional-predicate namespaces. Unknown names are a caller error; there is no
//! dynamic extension point.

use crate::arch::os_arch_variable;
use crate::profile::{split_hostname, Profile};
use crate::timezone;
use crate::vmcontext::VmContext;

use super::TemplateContext;

fn bool_str(b: bool) -> String {
    if b { "1".to_string() } else { "0".to_string() }
}

/// Resolve an `INSERT_<NAME>` variable against the expansion context.
/// `None` means the name is not in the closed set.
pub fn resolve(name: &str, ctx: &TemplateContext) -> Option<String> {
    let profile = ctx.profile;
    let vm = ctx.vm;
    let detection = ctx.detection;

    Some(match name {
            "USER_LOGIN" => profile.user_login.clone(),
            "USER_PASSWORD" => profile.user_password.clone(),
            "ROOT_PASSWORD" => profile.user_password.clone(),
            "USER_FULL_NAME" => profile.effective_full_name().to_string(),
            "PRODUCT_KEY" => profile.product_key.clone(),
            "POST_INSTALL_COMMAND" => profile.post_install_command.clone(),
            "AUXILIARY_INSTALL_DIR" => profile.auxiliary_base_path.display().to_string(),
            "PROXY" => profile.proxy.clone(),
            "IMAGE_INDEX" => profile.image_index.map(|i| i.to_string()).unwrap_or_default(),
            "OS_ARCH" | "OS_ARCH2" | "OS_ARCH3" | "OS_ARCH4" | "OS_ARCH6" => {
                os_arch_variable(name, vm.is_64_bit)?.to_string()
            }
            "GUEST_OS_VERSION" => detection.version.clone(),
            "GUEST_OS_MAJOR_VERSION" => detection.major_version().to_string(),
            "TIME_ZONE_UX" => timezone::resolve(&profile.time_zone).unix_name,
            "TIME_ZONE_WIN_NAME" => timezone::resolve(&profile.time_zone).windows_name,
            "TIME_ZONE_WIN_INDEX" => timezone::resolve(&profile.time_zone).windows_index.to_string(),
            "LOCALE" => profile.locale.clone(),
            "DASH_LOCALE" => profile.locale.replace('_', "-"),
            "LANGUAGE" => profile.language.clone(),
            "COUNTRY" => profile.country.clone(),
            "HOSTNAME_FQDN" => profile.hostname.clone(),
            "HOSTNAME_WITHOUT_DOMAIN" => split_hostname(&profile.hostname).0.to_string(),
            "HOSTNAME_WITHOUT_DOMAIN_MAX_15" => {
                let (label, _) = split_hostname(&profile.hostname);
                label.chars().take(15).collect()
            }
            "HOSTNAME_DOMAIN" => split_hostname(&profile.hostname).1.to_string(),
            "IS_INSTALLING_ADDITIONS" => bool_str(profile.install_additions),
            "IS_USER_LOGIN_ADMINISTRATOR" => bool_str(is_administrator_login(&profile.user_login)),
            "IS_INSTALLING_TEST_EXEC_SERVICE" => bool_str(profile.install_test_exec_service),
            "HAS_POST_INSTALL_COMMAND" => bool_str(!profile.post_install_command.is_empty()),
            "HAS_PRODUCT_KEY" => bool_str(!profile.product_key.is_empty()),
            "IS_MINIMAL_INSTALLATION" => bool_str(profile.is_minimal_installation()),
            "IS_FIRMWARE_UEFI" => bool_str(vm.is_uefi()),
            "IS_RTC_USING_UTC" => bool_str(vm.rtc_uses_utc),
            "HAS_PROXY" => bool_str(!profile.proxy.is_empty()),
            _ => return None,
        })
}

/// `root`/`Administrator` are the only logins this engine treats as
/// privileged for the `IS_USER_LOGIN_ADMINISTRATOR` predicate.
fn is_administrator_login(login: &str) -> bool {
    login.eq_ignore_ascii_case("administrator") || login.eq_ignore_ascii_case("root")
}

/// Resolve a `COND_<NAME>` predicate name.
pub fn resolve_predicate(name: &str, profile: &Profile, vm: &VmContext) -> Option<bool> {
    Some(match name {
            "IS_INSTALLING_ADDITIONS" => profile.install_additions,
            "IS_NOT_INSTALLING_ADDITIONS" => !profile.install_additions,
            "IS_USER_LOGIN_ADMINISTRATOR" => is_administrator_login(&profile.user_login),
            "IS_USER_LOGIN_NOT_ADMINISTRATOR" => !is_administrator_login(&profile.user_login),
            "IS_INSTALLING_TEST_EXEC_SERVICE" => profile.install_test_exec_service,
            "IS_NOT_INSTALLING_TEST_EXEC_SERVICE" => !profile.install_test_exec_service,
            "HAS_POST_INSTALL_COMMAND" => !profile.post_install_command.is_empty(),
            "HAS_NO_POST_INSTALL_COMMAND" => profile.post_install_command.is_empty(),
            "HAS_PRODUCT_KEY" => !profile.product_key.is_empty(),
            "HAS_NO_PRODUCT_KEY" => profile.product_key.is_empty(),
            "IS_MINIMAL_INSTALLATION" => profile.is_minimal_installation(),
            "IS_NOT_MINIMAL_INSTALLATION" => !profile.is_minimal_installation(),
            "IS_FIRMWARE_UEFI" => vm.is_uefi(),
            "IS_NOT_FIRMWARE_UEFI" => !vm.is_uefi(),
            "IS_RTC_USING_UTC" => vm.rtc_uses_utc,
            "IS_NOT_RTC_USING_UTC" => !vm.rtc_uses_utc,
            "HAS_PROXY" => !profile.proxy.is_empty(),
            "AVOID_UPDATES_OVER_NETWORK" => profile.avoid_updates_over_network,
            _ => return None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DetectionResult;
    use crate::vmcontext::Firmware;

    fn vm() -> VmContext {
        VmContext {
            guest_os_type_id: "Windows10_64".to_string(),
            is_64_bit: true,
            firmware: Firmware::Bios,
            rtc_uses_utc: false,
            machine_uuid: uuid::Uuid::nil(),
            machine_name: "test".to_string(),
        }
    }

    #[test]
    fn resolves_user_login_and_arch() {
        let profile = Profile {
            user_login: "vboxuser".to_string(),
            ..Default::default()
        };
        let detection = DetectionResult::default();
        let vm = vm();
        let ctx = TemplateContext { profile: &profile, vm: &vm, detection: &detection };
        assert_eq!(resolve("USER_LOGIN", &ctx).as_deref(), Some("vboxuser"));
        assert_eq!(resolve("OS_ARCH", &ctx).as_deref(), Some("amd64"));
    }

    #[test]
    fn unknown_variable_resolves_to_none() {
        let profile = Profile::default();
        let detection = DetectionResult::default();
        let vm = vm();
        let ctx = TemplateContext { profile: &profile, vm: &vm, detection: &detection };
        assert_eq!(resolve("NOT_A_VARIABLE", &ctx), None);
    }

    #[test]
    fn predicate_negated_forms_are_opposite() {
        let profile = Profile {
            product_key: "911".to_string(),
            ..Default::default()
        };
        let vm = vm();
        assert_eq!(resolve_predicate("HAS_PRODUCT_KEY", &profile, &vm), Some(true));
        assert_eq!(resolve_predicate("HAS_NO_PRODUCT_KEY", &profile, &vm), Some(false));
    }
}
