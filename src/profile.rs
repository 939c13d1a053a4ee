use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Customer record as served by the customer directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientProfile {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default, rename = "riskRating")]
    pub risk_rating: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub citizenship: Option<String>,
    /// Directory records carry either a flat string or a structured object.
    #[serde(default, deserialize_with = "address_to_string")]
    pub address: String,
    #[serde(default, rename = "taxResidency")]
    pub tax_residency: Option<String>,
    #[serde(default)]
    pub tenure: Option<String>,
    #[serde(default)]
    pub products: Option<Vec<String>>,
}

fn address_to_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => other.to_string(),
    })
}

impl ClientProfile {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }

    pub fn initials(&self) -> String {
        [&self.first_name, &self.last_name]
            .iter()
            .filter_map(|part| part.trim().chars().next())
            .flat_map(char::to_uppercase)
            .collect()
    }

    /// Header projection with `||` metadata folded out of the address.
    pub fn view(&self) -> ProfileView {
        let mut view = ProfileView {
            name: self.display_name(),
            address: String::new(),
            age: self.age,
            occupation: self.occupation.clone(),
            citizenship: self.citizenship.clone(),
            tax_residency: self.tax_residency.clone(),
            tenure: self.tenure.clone(),
            products: self.products.clone().unwrap_or_default(),
        };

        let parts = address_parts(&self.address);
        let cleaned: Vec<String> = parts
            .iter()
            .map(|part| view.absorb_metadata(part))
            .filter(|part| !part.is_empty())
            .collect();
        view.address = cleaned.join(", ");
        view
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileView {
    pub name: String,
    pub address: String,
    pub age: Option<u32>,
    pub occupation: Option<String>,
    pub citizenship: Option<String>,
    pub tax_residency: Option<String>,
    pub tenure: Option<String>,
    pub products: Vec<String>,
}

impl ProfileView {
    /// Applies `key: value` segments after `||` and returns the leading part.
    fn absorb_metadata(&mut self, part: &str) -> String {
        let mut segments = part.split("||");
        let main = segments.next().unwrap_or_default().trim().to_string();
        for segment in segments {
            let Some((key, value)) = segment.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.trim().to_ascii_lowercase().as_str() {
                "age" => {
                    if let Ok(age) = value.parse() {
                        self.age = Some(age);
                    }
                }
                "occupation" | "role" => self.occupation = Some(value.to_string()),
                "citizen" | "citizenship" => self.citizenship = Some(value.to_string()),
                "taxresidency" | "tax" => self.tax_residency = Some(value.to_string()),
                "tenure" => self.tenure = Some(value.to_string()),
                "products" => {
                    self.products = value
                        .split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                _ => {}
            }
        }
        main
    }
}

fn address_parts(address: &str) -> Vec<String> {
    let trimmed = address.trim();
    if trimmed.starts_with('{') {
        if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(trimmed) {
            return fields
                .values()
                .map(|value| match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect();
        }
    }
    vec![address.to_string()]
}
