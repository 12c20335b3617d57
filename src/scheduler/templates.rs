//! Template personalization.
//!
//! Substitutes `{{placeholder}}` tokens with entity profile fields.
//! Unknown placeholders are left in place so a half-broken template is
//! visible in the outgoing copy rather than silently blanked.

use crate::delivery::RenderedMessage;
use crate::domain::{Entity, MessageTemplate};
use regex::Regex;
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("valid placeholder regex"))
}

fn field_value(entity: &Entity, field: &str) -> Option<String> {
    match field {
        "name" => Some(entity.profile.contact.name.clone()),
        "company" => Some(entity.profile.contact.company.clone()),
        "email" => Some(entity.profile.contact.email.clone()),
        "region" => Some(entity.profile.region.clone()),
        "industry" => Some(entity.profile.industry.clone()),
        "fleet_size" => Some(entity.profile.fleet_size.to_string()),
        "monthly_volume" => Some(entity.profile.monthly_volume.to_string()),
        _ => None,
    }
}

fn substitute(text: &str, entity: &Entity) -> String {
    placeholder_re()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            field_value(entity, &caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Personalizes a template for one entity.
pub fn render(template: &MessageTemplate, entity: &Entity) -> RenderedMessage {
    RenderedMessage {
        template_id: template.id.clone(),
        subject: substitute(&template.subject, entity),
        body: substitute(&template.body, entity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContactInfo, EntityCategory, EntityProfile, TimestampUtc};

    fn entity() -> Entity {
        Entity::new(
            EntityCategory::Carrier,
            EntityProfile {
                contact: ContactInfo {
                    name: "Marta Silva".to_string(),
                    company: "Silva Transport".to_string(),
                    email: "marta@silvatransport.example".to_string(),
                    phone: None,
                },
                estimated_revenue: 300_000.0,
                fleet_size: 24,
                monthly_volume: 80,
                industry: "Logistics".to_string(),
                region: "Southwest".to_string(),
                capabilities: vec![],
                rating: 4.0,
            },
            TimestampUtc::now(),
        )
    }

    #[test]
    fn substitutes_profile_fields() {
        let template = MessageTemplate {
            id: "intro".into(),
            subject: "Partnership with {{company}}".to_string(),
            body: "Hi {{name}}, we work with {{fleet_size}}-truck fleets in {{region}}."
                .to_string(),
        };
        let rendered = render(&template, &entity());
        assert_eq!(rendered.subject, "Partnership with Silva Transport");
        assert_eq!(
            rendered.body,
            "Hi Marta Silva, we work with 24-truck fleets in Southwest."
        );
    }

    #[test]
    fn unknown_placeholders_are_preserved() {
        let template = MessageTemplate {
            id: "intro".into(),
            subject: "Hello {{nonexistent}}".to_string(),
            body: "{{ name }} / {{unknown_field}}".to_string(),
        };
        let rendered = render(&template, &entity());
        assert_eq!(rendered.subject, "Hello {{nonexistent}}");
        assert_eq!(rendered.body, "Marta Silva / {{unknown_field}}");
    }
}
