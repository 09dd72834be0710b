//! Entity fixtures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use helios_storage_spi::types::{
    Entity, EntityDescriptor, FieldDescriptor, FieldRole, Key, SemanticType,
};

/// A person keyed by a text identity with a unique email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    /// Identity; generated when absent.
    pub id: Option<String>,
    /// Display name; omitted from the record when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Unique email address.
    pub email: Option<String>,
    /// Age in years.
    pub age: Option<i64>,
    /// City of residence.
    pub city: Option<String>,
    /// Creation stamp maintained by the store.
    pub created: Option<DateTime<Utc>>,
    /// Version counter maintained by the store.
    pub version: Option<i64>,
}

impl Person {
    /// Creates a person with an identity.
    pub fn new(id: &str, name: &str, age: i64) -> Self {
        Self {
            id: Some(id.to_string()),
            name: name.to_string(),
            email: None,
            age: Some(age),
            city: None,
            created: None,
            version: None,
        }
    }

    /// Creates a person without an identity.
    pub fn anonymous(name: &str, age: i64) -> Self {
        Self {
            id: None,
            ..Self::new("", name, age)
        }
    }

    /// Sets the email.
    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    /// Sets the city.
    pub fn with_city(mut self, city: &str) -> Self {
        self.city = Some(city.to_string());
        self
    }

    /// Returns the identity key.
    pub fn key(&self) -> Key {
        Key::from(self.id.clone().unwrap_or_default())
    }

    /// An example matching every person in a city.
    pub fn example_in(city: &str) -> Self {
        Self {
            id: None,
            name: String::new(),
            email: None,
            age: None,
            city: Some(city.to_string()),
            created: None,
            version: None,
        }
    }
}

impl Entity for Person {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::builder("Person")
            .field(FieldDescriptor::new("id", SemanticType::Text).with_role(FieldRole::Identity))
            .field(FieldDescriptor::new("name", SemanticType::Text).with_role(FieldRole::Required))
            .field(FieldDescriptor::new("email", SemanticType::Text))
            .field(FieldDescriptor::new("age", SemanticType::Integer))
            .field(FieldDescriptor::new("city", SemanticType::Text))
            .field(
                FieldDescriptor::new("created", SemanticType::Timestamp)
                    .with_role(FieldRole::Audit)
                    .with_role(FieldRole::Immutable),
            )
            .field(
                FieldDescriptor::new("version", SemanticType::Integer).with_role(FieldRole::Audit),
            )
            .alternate_key("email", &["email"])
            .build()
    }
}

/// A ticket keyed by a generated integer identity and a composite primary
/// key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Generated sequence number.
    pub id: Option<i64>,
    /// Owning project.
    pub project: String,
    /// Number within the project.
    pub number: i64,
    /// Summary line.
    pub title: String,
}

impl Ticket {
    /// Creates a ticket without an identity.
    pub fn new(project: &str, number: i64, title: &str) -> Self {
        Self {
            id: None,
            project: project.to_string(),
            number,
            title: title.to_string(),
        }
    }
}

impl Entity for Ticket {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::builder("Ticket")
            .field(FieldDescriptor::new("id", SemanticType::Integer).with_role(FieldRole::Identity))
            .field(
                FieldDescriptor::new("project", SemanticType::Text)
                    .with_role(FieldRole::PrimaryKey),
            )
            .field(
                FieldDescriptor::new("number", SemanticType::Integer)
                    .with_role(FieldRole::PrimaryKey),
            )
            .field(FieldDescriptor::new("title", SemanticType::Text))
            .build()
    }
}

/// A small population used by query tests.
pub fn people() -> Vec<Person> {
    vec![
        Person::new("p1", "Ann", 34).with_city("Oslo").with_email("ann@example.com"),
        Person::new("p2", "Bob", 27).with_city("Bergen"),
        Person::new("p3", "Cid", 34).with_city("Oslo"),
        Person::new("p4", "Dag", 51),
        Person::new("p5", "Eva", 19).with_city("Bergen"),
    ]
}
