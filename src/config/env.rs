//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

use super::{HarnessConfig, ProviderKind};

/// Environment variable prefix
const ENV_PREFIX: &str = "WALA_LIFECYCLE";

/// Configuration taken from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Provider from WALA_LIFECYCLE_PROVIDER
    pub provider: Option<String>,
    /// VM name from WALA_LIFECYCLE_VM_NAME
    pub vm_name: Option<String>,
    /// Username from WALA_LIFECYCLE_USERNAME
    pub username: Option<String>,
    /// Password from WALA_LIFECYCLE_PASSWORD
    pub password: Option<String>,
    /// Resource group from WALA_LIFECYCLE_RESOURCE_GROUP
    pub resource_group: Option<String>,
    /// Location from WALA_LIFECYCLE_LOCATION
    pub location: Option<String>,
    /// Namespace from WALA_LIFECYCLE_NAMESPACE
    pub namespace: Option<String>,
    /// Service principal secret from WALA_LIFECYCLE_AZURE_CLIENT_SECRET
    pub azure_client_secret: Option<String>,
    /// Config file from WALA_LIFECYCLE_CONFIG
    pub config_file: Option<String>,
    /// Verbose from WALA_LIFECYCLE_VERBOSE
    pub verbose: Option<bool>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            provider: get_env("PROVIDER"),
            vm_name: get_env("VM_NAME"),
            username: get_env("USERNAME"),
            password: get_env("PASSWORD"),
            resource_group: get_env("RESOURCE_GROUP"),
            location: get_env("LOCATION"),
            namespace: get_env("NAMESPACE"),
            azure_client_secret: get_env("AZURE_CLIENT_SECRET"),
            config_file: get_env("CONFIG"),
            verbose: get_env_bool("VERBOSE"),
        }
    }

    /// Check if any override is set
    pub fn has_any(&self) -> bool {
        self.provider.is_some()
            || self.vm_name.is_some()
            || self.username.is_some()
            || self.password.is_some()
            || self.resource_group.is_some()
            || self.location.is_some()
            || self.namespace.is_some()
            || self.azure_client_secret.is_some()
    }

    /// Apply overrides on top of a loaded configuration
    pub fn apply(&self, config: &mut HarnessConfig) -> anyhow::Result<()> {
        if let Some(ref provider) = self.provider {
            config.provider.kind = ProviderKind::from_str(provider)
                .ok_or_else(|| anyhow::anyhow!("Unknown provider in {ENV_PREFIX}_PROVIDER: {provider}"))?;
        }
        if let Some(ref name) = self.vm_name {
            config.vm.name = name.clone();
        }
        if let Some(ref username) = self.username {
            config.vm.username = username.clone();
        }
        if let Some(ref password) = self.password {
            config.vm.password = Some(password.clone());
        }
        if let Some(ref group) = self.resource_group {
            config.provider.azure.resource_group = group.clone();
        }
        if let Some(ref location) = self.location {
            config.provider.azure.location = Some(location.clone());
        }
        if let Some(ref namespace) = self.namespace {
            config.provider.kubevirt.namespace = namespace.clone();
        }
        if let Some(ref secret) = self.azure_client_secret {
            config.provider.azure.client_secret = Some(secret.clone());
        }
        Ok(())
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "********");
        println!("Environment Configuration:");
        println!("  {}_PROVIDER:            {:?}", ENV_PREFIX, self.provider);
        println!("  {}_VM_NAME:             {:?}", ENV_PREFIX, self.vm_name);
        println!("  {}_USERNAME:            {:?}", ENV_PREFIX, self.username);
        println!("  {}_PASSWORD:            {:?}", ENV_PREFIX, mask(&self.password));
        println!("  {}_RESOURCE_GROUP:      {:?}", ENV_PREFIX, self.resource_group);
        println!("  {}_LOCATION:            {:?}", ENV_PREFIX, self.location);
        println!("  {}_NAMESPACE:           {:?}", ENV_PREFIX, self.namespace);
        println!(
            "  {}_AZURE_CLIENT_SECRET: {:?}",
            ENV_PREFIX,
            mask(&self.azure_client_secret)
        );
        println!("  {}_CONFIG:              {:?}", ENV_PREFIX, self.config_file);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Print all WALA_LIFECYCLE environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_PROVIDER              Provider backend (azure, kubevirt)");
    println!("  {ENV_PREFIX}_VM_NAME               Name of the VM under test");
    println!("  {ENV_PREFIX}_USERNAME              Admin username");
    println!("  {ENV_PREFIX}_PASSWORD              Admin password");
    println!("  {ENV_PREFIX}_RESOURCE_GROUP        Azure resource group");
    println!("  {ENV_PREFIX}_LOCATION              Azure region");
    println!("  {ENV_PREFIX}_NAMESPACE             KubeVirt namespace");
    println!("  {ENV_PREFIX}_AZURE_CLIENT_SECRET   Service principal secret");
    println!("  {ENV_PREFIX}_CONFIG                Path to configuration file");
    println!("  {ENV_PREFIX}_VERBOSE               Enable debug logging (true/false)");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_PASSWORD='...'");
    println!("  wala-lifecycle run --tier tier1");
}

/// Builder for setting environment variables in tests
#[cfg(test)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

#[cfg(test)]
impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    pub fn var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
        self
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        for (key, value) in self.vars {
            env::set_var(key, value);
        }

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
#[cfg(test)]
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}
