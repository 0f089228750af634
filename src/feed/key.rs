use crate::domain::{ConnectionOptions, TriggerConfig};
use std::fmt::{self, Display, Write as _};

/// Canonical pool key: two triggers share a connection exactly when their keys are equal.
///
/// The key embeds the apikey and broker password, so `Debug` never prints it. Use
/// [`connection_label`] for logs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey(String);

impl ConnectionKey {
    pub fn for_trigger(trigger: &TriggerConfig) -> Self {
        Self::build(
            &trigger.namespace,
            &trigger.apikey,
            trigger.feed_tag.as_deref(),
            &trigger.connection,
        )
    }

    pub fn build(
        namespace: &str,
        apikey: &str,
        feed_tag: Option<&str>,
        options: &ConnectionOptions,
    ) -> Self {
        let mut key = String::new();
        key.push_str(&escape(namespace));
        key.push(':');
        key.push_str(&escape(apikey));
        key.push('-');
        if let Some(tag) = feed_tag {
            key.push_str(&escape(tag));
        }
        push_option(&mut key, Some(&options.host()));
        push_option(&mut key, Some(&options.port()));
        push_option(&mut key, options.username.as_ref());
        push_option(&mut key, options.password.as_ref());
        push_option(&mut key, options.reconnect.as_ref());
        push_option(&mut key, options.reconnect_limit.as_ref());
        push_option(&mut key, options.initial_reconnect_delay.as_ref());
        push_option(&mut key, options.max_reconnect_delay.as_ref());
        push_option(&mut key, options.tcp_no_delay.as_ref());
        push_option(&mut key, options.sasl_mechanisms.as_ref());
        push_option(&mut key, options.enable_sasl_external.as_ref());
        push_option(&mut key, options.require_sasl.as_ref());
        push_option(&mut key, options.disable_sasl.as_ref());
        push_option(
            &mut key,
            options.non_fatal_errors.as_ref().map(|errors| errors.join(",")).as_ref(),
        );
        if options.is_tls() {
            key.push_str("-TLS");
            push_option(&mut key, options.ca.as_ref());
            push_option(&mut key, options.cert.as_ref());
            push_option(&mut key, options.reject_unauthorized.as_ref());
            push_option(&mut key, options.servername.as_ref());
        }
        Self(key)
    }
}

impl fmt::Debug for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionKey(<redacted, {} bytes>)", self.0.len())
    }
}

/// Credential-free label for a connection: `namespace:user:host:port[-feed_tag]`.
pub fn connection_label(trigger: &TriggerConfig) -> String {
    let mut label = format!(
        "{}:{}:{}:{}",
        trigger.namespace,
        trigger.user(),
        trigger.connection.host(),
        trigger.connection.port()
    );
    if let Some(tag) = trigger.feed_tag.as_deref() {
        label.push('-');
        label.push_str(tag);
    }
    label
}

// Absent options render as `.`, present ones as `:value`. Values are escaped so that
// no value can imitate a separator.
fn push_option<T: Display>(key: &mut String, value: Option<&T>) {
    match value {
        None => key.push('.'),
        Some(value) => {
            key.push(':');
            let mut rendered = String::new();
            let _ = write!(rendered, "{value}");
            key.push_str(&escape(&rendered));
        }
    }
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            '.' => escaped.push_str("%2E"),
            '-' => escaped.push_str("%2D"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(options: ConnectionOptions) -> TriggerConfig {
        TriggerConfig::new("alice:secret", "guest", "orders", "queue", options)
    }

    #[test]
    fn identical_parameters_share_a_key() {
        let lhs = trigger(ConnectionOptions::for_host("broker"));
        let rhs = TriggerConfig::new(
            "alice:secret",
            "guest",
            "invoices",
            "other-queue",
            ConnectionOptions::for_host("broker"),
        );
        assert_eq!(ConnectionKey::for_trigger(&lhs), ConnectionKey::for_trigger(&rhs));

        let implicit = trigger(ConnectionOptions::default());
        let explicit = trigger(ConnectionOptions {
            port: Some(5672),
            ..ConnectionOptions::for_host("localhost")
        });
        assert_eq!(
            ConnectionKey::for_trigger(&implicit),
            ConnectionKey::for_trigger(&explicit)
        );
    }

    #[test]
    fn any_connection_field_changes_the_key() {
        let base = ConnectionKey::for_trigger(&trigger(ConnectionOptions::for_host("broker")));

        let variants = [
            ConnectionOptions {
                port: Some(5673),
                ..ConnectionOptions::for_host("broker")
            },
            ConnectionOptions {
                password: Some("pw".to_string()),
                ..ConnectionOptions::for_host("broker")
            },
            ConnectionOptions {
                reconnect: Some(false),
                ..ConnectionOptions::for_host("broker")
            },
            ConnectionOptions::for_host("other-broker"),
        ];
        for options in variants {
            assert_ne!(ConnectionKey::for_trigger(&trigger(options)), base);
        }

        let tagged = trigger(ConnectionOptions::for_host("broker")).with_feed_tag("blue");
        assert_ne!(ConnectionKey::for_trigger(&tagged), base);

        let other_namespace = TriggerConfig::new(
            "alice:secret",
            "prod",
            "orders",
            "queue",
            ConnectionOptions::for_host("broker"),
        );
        assert_ne!(ConnectionKey::for_trigger(&other_namespace), base);
    }

    #[test]
    fn separators_inside_values_do_not_collide() {
        let lhs = trigger(ConnectionOptions {
            username: Some("a:b".to_string()),
            ..ConnectionOptions::for_host("broker")
        });
        let rhs = trigger(ConnectionOptions {
            username: Some("a".to_string()),
            password: Some("b".to_string()),
            ..ConnectionOptions::for_host("broker")
        });
        assert_ne!(ConnectionKey::for_trigger(&lhs), ConnectionKey::for_trigger(&rhs));
    }

    #[test]
    fn tls_material_only_counts_for_secured_transports() {
        let plain = trigger(ConnectionOptions {
            ca: Some("ca-1".to_string()),
            ..ConnectionOptions::for_host("broker")
        });
        let plain_other = trigger(ConnectionOptions {
            ca: Some("ca-2".to_string()),
            ..ConnectionOptions::for_host("broker")
        });
        assert_eq!(
            ConnectionKey::for_trigger(&plain),
            ConnectionKey::for_trigger(&plain_other)
        );

        let secured = |ca: &str| {
            trigger(ConnectionOptions {
                transport: Some("tls".to_string()),
                ca: Some(ca.to_string()),
                ..ConnectionOptions::for_host("broker")
            })
        };
        assert_ne!(
            ConnectionKey::for_trigger(&secured("ca-1")),
            ConnectionKey::for_trigger(&secured("ca-2"))
        );
    }

    #[test]
    fn debug_and_label_hide_credentials() {
        let config = trigger(ConnectionOptions {
            password: Some("hunter2".to_string()),
            ..ConnectionOptions::for_host("broker")
        });
        let key = ConnectionKey::for_trigger(&config);
        assert!(!format!("{key:?}").contains("secret"));
        assert_eq!(connection_label(&config), "guest:alice:broker:5672");
    }
}
