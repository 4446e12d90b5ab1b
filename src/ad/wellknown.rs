//! Well-known security identifiers and node names.

/// Enterprise Domain Controllers.
pub const ENTERPRISE_DOMAIN_CONTROLLERS_SUFFIX: &str = "1-5-9";
/// Built-in Administrator account.
pub const ADMINISTRATOR_ACCOUNT_SUFFIX: &str = "-500";
/// Domain Admins.
pub const DOMAIN_ADMINS_SUFFIX: &str = "-512";
/// Domain Users.
pub const DOMAIN_USERS_SUFFIX: &str = "-513";
/// Domain Computers.
pub const DOMAIN_COMPUTERS_SUFFIX: &str = "-515";
/// Domain Controllers.
pub const DOMAIN_CONTROLLERS_SUFFIX: &str = "-516";
/// Schema Admins.
pub const SCHEMA_ADMINS_SUFFIX: &str = "-518";
/// Enterprise Admins.
pub const ENTERPRISE_ADMINS_SUFFIX: &str = "-519";
/// Key Admins.
pub const KEY_ADMINS_SUFFIX: &str = "-526";
/// Enterprise Key Admins.
pub const ENTERPRISE_KEY_ADMINS_SUFFIX: &str = "-527";
/// Administrators.
pub const ADMINISTRATORS_SUFFIX: &str = "-544";
/// Backup Operators.
pub const BACKUP_OPERATORS_SUFFIX: &str = "-551";
/// Remote Desktop Users.
pub const REMOTE_DESKTOP_USERS_SUFFIX: &str = "-555";
/// Distributed COM Users.
pub const DISTRIBUTED_COM_USERS_SUFFIX: &str = "-562";
/// Remote Management Users.
pub const REMOTE_MANAGEMENT_USERS_SUFFIX: &str = "-580";
/// Authenticated Users, qualified by domain name.
pub const AUTHENTICATED_USERS_SUFFIX: &str = "-S-1-5-11";
/// Everyone, qualified by domain name.
pub const EVERYONE_SUFFIX: &str = "-S-1-1-0";

/// Name of the local group Citrix installs for direct access.
pub const DIRECT_ACCESS_USERS_NAME: &str = "Direct Access Users";

/// Groups that must carry the group kind even when collected without it.
pub const GROUP_SUFFIXES: [&str; 9] = [
    ENTERPRISE_KEY_ADMINS_SUFFIX,
    KEY_ADMINS_SUFFIX,
    ENTERPRISE_DOMAIN_CONTROLLERS_SUFFIX,
    DOMAIN_ADMINS_SUFFIX,
    DOMAIN_CONTROLLERS_SUFFIX,
    SCHEMA_ADMINS_SUFFIX,
    ENTERPRISE_ADMINS_SUFFIX,
    ADMINISTRATORS_SUFFIX,
    BACKUP_OPERATORS_SUFFIX,
];

/// Node name prefix of Domain Users.
pub const DOMAIN_USERS_NAME_PREFIX: &str = "DOMAIN USERS@";
/// Node name prefix of Authenticated Users.
pub const AUTHENTICATED_USERS_NAME_PREFIX: &str = "AUTHENTICATED USERS@";
/// Node name prefix of Everyone.
pub const EVERYONE_NAME_PREFIX: &str = "EVERYONE@";
/// Node name prefix of Domain Computers.
pub const DOMAIN_COMPUTERS_NAME_PREFIX: &str = "DOMAIN COMPUTERS@";

/// Qualifies a well-known suffix with a domain SID or name.
pub fn define_sid(qualifier: &str, suffix: &str) -> String {
    format!("{qualifier}{suffix}")
}

/// Display name of a well-known group in `domain`.
pub fn define_node_name(prefix: &str, domain: &str) -> String {
    format!("{prefix}{domain}")
}

/// Domain SID portion of an object SID, or `None` when it has no `-` separator.
pub fn domain_sid_of(object_id: &str) -> Option<&str> {
    object_id.rfind('-').map(|idx| &object_id[..idx])
}
