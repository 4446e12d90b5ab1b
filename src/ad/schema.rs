//! Node kinds, relationship kinds and property names of the directory schema.

use crate::types::Kind;

macro_rules! kinds {
    ($($(#[$meta:meta])* $name:ident = $value:literal;)*) => {
        $(
            $(#[$meta])*
            pub const $name: Kind = Kind::from_static($value);
        )*
    };
}

/// Node kinds.
pub mod node {
    use super::Kind;

    kinds! {
        /// Any collected directory object.
        ENTITY = "Base";
        /// User account.
        USER = "User";
        /// Domain group.
        GROUP = "Group";
        /// Computer-local group.
        LOCAL_GROUP = "LocalGroup";
        /// Computer account.
        COMPUTER = "Computer";
        /// Domain.
        DOMAIN = "Domain";
        /// Organizational unit.
        OU = "OU";
        /// Generic container.
        CONTAINER = "Container";
        /// Group policy object.
        GPO = "GPO";
        /// Certificate template.
        CERT_TEMPLATE = "CertTemplate";
        /// Enterprise certificate authority.
        ENTERPRISE_CA = "EnterpriseCA";
        /// Root certificate authority.
        ROOT_CA = "RootCA";
        /// Intermediate (AIA) certificate authority.
        AIA_CA = "AIACA";
        /// NTAuth certificate store.
        NT_AUTH_STORE = "NTAuthStore";
        /// Issuance policy object.
        ISSUANCE_POLICY = "IssuancePolicy";
    }
}

/// Relationship kinds.
pub mod rel {
    use super::Kind;

    kinds! {
        /// Direct group membership.
        MEMBER_OF = "MemberOf";
        /// Direct local group membership.
        MEMBER_OF_LOCAL_GROUP = "MemberOfLocalGroup";
        /// Local group belongs to a computer.
        LOCAL_TO_COMPUTER = "LocalToComputer";
        /// User rights assignment: remote interactive logon.
        REMOTE_INTERACTIVE_LOGON_RIGHT = "RemoteInteractiveLogonRight";
        /// Replication right.
        GET_CHANGES = "GetChanges";
        /// Replication right including secrets.
        GET_CHANGES_ALL = "GetChangesAll";
        /// Replication right over the filtered attribute set.
        GET_CHANGES_IN_FILTERED_SET = "GetChangesInFilteredSet";
        /// Trust inside one forest.
        SAME_FOREST_TRUST = "SameForestTrust";
        /// Trust across forests.
        CROSS_FOREST_TRUST = "CrossForestTrust";
        /// Computer is a domain controller of a domain.
        DC_FOR = "DCFor";
        /// Containment in the directory tree.
        CONTAINS = "Contains";
        /// GPO link on a domain or OU.
        GP_LINK = "GPLink";
        /// Full control.
        GENERIC_ALL = "GenericAll";
        /// Write to any attribute.
        GENERIC_WRITE = "GenericWrite";
        /// Modify the DACL.
        WRITE_DACL = "WriteDacl";
        /// Take ownership.
        WRITE_OWNER = "WriteOwner";
        /// Ownership.
        OWNS = "Owns";
        /// Modify GPO links.
        WRITE_GP_LINK = "WriteGPLink";
        /// All extended rights.
        ALL_EXTENDED_RIGHTS = "AllExtendedRights";
        /// Certificate enrollment right.
        ENROLL = "Enroll";
        /// Template is published to a CA.
        PUBLISHED_TO = "PublishedTo";
        /// Computer hosts a CA service.
        HOSTS_CA_SERVICE = "HostsCAService";
        /// Root CA is trusted by a domain.
        ROOT_CA_FOR = "RootCAFor";
        /// NTAuth store serves a domain.
        NT_AUTH_STORE_FOR = "NTAuthStoreFor";
        /// Template carries an issuance policy.
        EXTENDED_BY_POLICY = "ExtendedByPolicy";
        /// Issuance policy linked to a group.
        OID_GROUP_LINK = "OIDGroupLink";

        /// Derived: replication of every secret.
        DC_SYNC = "DCSync";
        /// Derived: read LAPS passwords through replication.
        SYNC_LAPS_PASSWORD = "SyncLAPSPassword";
        /// Derived: domain holds the trust account credentials.
        HAS_TRUST_KEYS = "HasTrustKeys";
        /// Derived: local administrator.
        ADMIN_TO = "AdminTo";
        /// Derived: PowerShell remoting.
        CAN_PS_REMOTE = "CanPSRemote";
        /// Derived: DCOM execution.
        EXECUTE_DCOM = "ExecuteDCOM";
        /// Derived: remote desktop.
        CAN_RDP = "CanRDP";
        /// Derived: CA certificate is in an NTAuth store.
        TRUSTED_FOR_NT_AUTH = "TrustedForNTAuth";
        /// Derived: CA certificate issued by another CA.
        ISSUED_SIGNED_BY = "IssuedSignedBy";
        /// Derived: enterprise CA is backed by a root or AIA CA certificate.
        ENTERPRISE_CA_FOR = "EnterpriseCAFor";
        /// Derived: CA host can forge certificates for a domain.
        GOLDEN_CERT = "GoldenCert";
        /// Derived: enrollment agent template can enroll on behalf of another.
        ENROLL_ON_BEHALF_OF = "EnrollOnBehalfOf";
        /// Derived: ESC1.
        ADCS_ESC1 = "ADCSESC1";
        /// Derived: ESC3.
        ADCS_ESC3 = "ADCSESC3";
        /// Derived: ESC4.
        ADCS_ESC4 = "ADCSESC4";
        /// Derived: ESC6a.
        ADCS_ESC6A = "ADCSESC6a";
        /// Derived: ESC6b.
        ADCS_ESC6B = "ADCSESC6b";
        /// Derived: ESC9a.
        ADCS_ESC9A = "ADCSESC9a";
        /// Derived: ESC9b.
        ADCS_ESC9B = "ADCSESC9b";
        /// Derived: ESC10a.
        ADCS_ESC10A = "ADCSESC10a";
        /// Derived: ESC10b.
        ADCS_ESC10B = "ADCSESC10b";
        /// Derived: ESC13.
        ADCS_ESC13 = "ADCSESC13";
        /// Derived: NTLM relay to SMB.
        COERCE_AND_RELAY_NTLM_TO_SMB = "CoerceAndRelayNTLMToSMB";
        /// Derived: NTLM relay to LDAP.
        COERCE_AND_RELAY_NTLM_TO_LDAP = "CoerceAndRelayNTLMToLDAP";
        /// Derived: NTLM relay to LDAPS.
        COERCE_AND_RELAY_NTLM_TO_LDAPS = "CoerceAndRelayNTLMToLDAPS";
        /// Derived: NTLM relay to AD CS web enrollment.
        COERCE_AND_RELAY_NTLM_TO_ADCS = "CoerceAndRelayNTLMToADCS";
        /// Derived: GPO applies to an object.
        GPO_APPLIES_TO = "GPOAppliesTo";
        /// Derived: principal can make a GPO apply to an object.
        CAN_APPLY_GPO = "CanApplyGPO";
    }

    /// Rights granting enrollment on a certificate template.
    pub const TEMPLATE_ENROLLMENT: [Kind; 3] = [ENROLL, GENERIC_ALL, ALL_EXTENDED_RIGHTS];

    /// Rights granting control over an object's security descriptor or owner.
    pub const OBJECT_CONTROL: [Kind; 5] = [GENERIC_ALL, GENERIC_WRITE, OWNS, WRITE_OWNER, WRITE_DACL];

    /// Relationships followed when resolving membership.
    pub const MEMBERSHIP: [Kind; 2] = [MEMBER_OF, MEMBER_OF_LOCAL_GROUP];

    /// Relationships climbing a certificate chain.
    pub const CERT_CHAIN: [Kind; 2] = [ISSUED_SIGNED_BY, ENTERPRISE_CA_FOR];
}

/// Property names.
pub mod prop {
    /// Security identifier or GUID of the object.
    pub const OBJECT_ID: &str = "objectid";
    /// Display name.
    pub const NAME: &str = "name";
    /// Domain SID the object belongs to.
    pub const DOMAIN_SID: &str = "domainsid";
    /// Domain FQDN the object belongs to.
    pub const DOMAIN_FQDN: &str = "domain";
    /// Last time the object or relationship was observed.
    pub const LAST_SEEN: &str = "lastseen";
    /// Domain was collected directly.
    pub const COLLECTED: &str = "collected";
    /// Domain NetBIOS name.
    pub const NETBIOS: &str = "netbios";
    /// Account name.
    pub const SAM_ACCOUNT_NAME: &str = "samaccountname";
    /// Distinguished name.
    pub const DISTINGUISHED_NAME: &str = "distinguishedname";

    /// Computer has LAPS.
    pub const HAS_LAPS: &str = "haslaps";
    /// User rights assignments were collected for the computer.
    pub const HAS_URA: &str = "hasura";
    /// SMB signing is required.
    pub const SMB_SIGNING: &str = "smbsigning";
    /// Outbound NTLM is restricted.
    pub const RESTRICT_OUTBOUND_NTLM: &str = "restrictoutboundntlm";
    /// WebClient service is running.
    pub const WEB_CLIENT_RUNNING: &str = "webclientrunning";
    /// LDAP signing is required on a domain controller.
    pub const LDAP_SIGNING: &str = "ldapsigning";
    /// LDAPS is available on a domain controller.
    pub const LDAPS_AVAILABLE: &str = "ldapsavailable";
    /// LDAPS channel binding is enforced on a domain controller.
    pub const LDAPS_EPA: &str = "ldapsepa";
    /// Raw `StrongCertificateBindingEnforcement` registry value.
    pub const STRONG_CERTIFICATE_BINDING_ENFORCEMENT: &str = "strongcertificatebindingenforcementraw";
    /// Raw `CertificateMappingMethods` registry value.
    pub const CERTIFICATE_MAPPING_METHODS: &str = "certificatemappingmethodsraw";

    /// OU blocks GPO inheritance.
    pub const BLOCKS_INHERITANCE: &str = "blocksinheritance";
    /// GPO link is enforced.
    pub const ENFORCED: &str = "enforced";

    /// Template requires manager approval.
    pub const REQUIRES_MANAGER_APPROVAL: &str = "requiresmanagerapproval";
    /// Template issues certificates usable for authentication.
    pub const AUTHENTICATION_ENABLED: &str = "authenticationenabled";
    /// Enrollee supplies the subject.
    pub const ENROLLEE_SUPPLIES_SUBJECT: &str = "enrolleesuppliessubject";
    /// Template schema version.
    pub const SCHEMA_VERSION: &str = "schemaversion";
    /// Authorized signatures required.
    pub const AUTHORIZED_SIGNATURES: &str = "authorizedsignatures";
    /// Effective extended key usages.
    pub const EFFECTIVE_EKUS: &str = "effectiveekus";
    /// Application policies required for issuance.
    pub const APPLICATION_POLICIES: &str = "applicationpolicies";
    /// Template omits the security extension.
    pub const NO_SECURITY_EXTENSION: &str = "nosecurityextension";
    /// Subject alternative name requires a UPN.
    pub const SUBJECT_ALT_REQUIRE_UPN: &str = "subjectaltrequireupn";
    /// Subject alternative name requires a DNS name.
    pub const SUBJECT_ALT_REQUIRE_DNS: &str = "subjectaltrequiredns";

    /// Certificate thumbprint.
    pub const CERT_THUMBPRINT: &str = "certthumbprint";
    /// Thumbprints held by an NTAuth store.
    pub const CERT_THUMBPRINTS: &str = "certthumbprints";
    /// Thumbprints of the certificate chain, leaf first.
    pub const CERT_CHAIN: &str = "certchain";
    /// CA allows requesters to specify a SAN.
    pub const IS_USER_SPECIFIES_SAN_ENABLED: &str = "isuserspecifiessanenabled";
    /// CA restricts enrollment agents.
    pub const HAS_ENROLLMENT_AGENT_RESTRICTIONS: &str = "hasenrollmentagentrestrictions";
    /// CA web enrollment endpoint accepts NTLM without protection.
    pub const HAS_VULNERABLE_ENDPOINT: &str = "hasvulnerableendpoint";
}

/// Extended key usage and application policy OIDs.
pub mod oid {
    /// Certificate Request Agent.
    pub const CERTIFICATE_REQUEST_AGENT: &str = "1.3.6.1.4.1.311.20.2.1";
    /// Any Purpose.
    pub const ANY_PURPOSE: &str = "2.5.29.37.0";
}
