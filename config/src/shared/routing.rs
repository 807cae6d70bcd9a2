use serde::Deserialize;

/// A principal that receives privileges on target schemas and tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grantee {
    /// User or group name.
    pub name: String,
    /// Whether the grant targets a group rather than a user.
    pub is_group: bool,
}

/// Grantees as written in the configuration.
///
/// Accepts a single user name, a list of user names, or an object with separate `users` and
/// `groups` lists.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SelectPermissions {
    User(String),
    Users(Vec<String>),
    UsersAndGroups {
        #[serde(default)]
        users: Vec<String>,
        #[serde(default)]
        groups: Vec<String>,
    },
}

impl SelectPermissions {
    /// Expands the setting into individual grantees, users first.
    pub fn grantees(&self) -> Vec<Grantee> {
        let user = |name: &String| Grantee {
            name: name.clone(),
            is_group: false,
        };

        match self {
            SelectPermissions::User(name) => vec![user(name)],
            SelectPermissions::Users(names) => names.iter().map(user).collect(),
            SelectPermissions::UsersAndGroups { users, groups } => users
                .iter()
                .map(user)
                .chain(groups.iter().map(|name| Grantee {
                    name: name.clone(),
                    is_group: true,
                }))
                .collect(),
        }
    }
}

/// Per-source-schema routing entry of `schema_mapping`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchemaMappingEntry {
    /// Namespace in the warehouse that receives the streams of this source schema.
    pub target_schema: String,
    /// Grantees overriding `default_target_schema_select_permissions` for this namespace.
    #[serde(default)]
    pub target_schema_select_permissions: Option<SelectPermissions>,
}
