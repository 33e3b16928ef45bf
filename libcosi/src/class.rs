//! Class resolution and policy checks.
//!
//! Pure functions over a snapshot of the class stores.  Callers re-resolve
//! on every reconciliation pass; classes may change between passes and no
//! selection is cached.

use crate::error::CosiError;
use crate::types::{Bucket, BucketAccessClass, BucketClass, Protocol, ProtocolSignature};

/// Select the bucket class for a request.
///
/// With an explicit name the matching class is returned or
/// [`CosiError::ClassNotFound`].  Without one, the unique class carrying the
/// default flag is selected; zero defaults is [`CosiError::NoDefaultClass`]
/// and more than one is [`CosiError::AmbiguousDefault`] — ambiguity is a
/// configuration error, never resolved by first-match.  The selected class
/// must list the request's protocol or resolution fails with
/// [`CosiError::ProtocolMismatch`].
pub fn resolve_bucket_class(
    explicit: Option<&str>,
    protocol: &Protocol,
    classes: &[BucketClass],
) -> Result<BucketClass, CosiError> {
    let class = match explicit {
        Some(name) => classes
            .iter()
            .find(|c| c.metadata.name == name)
            .cloned()
            .ok_or_else(|| CosiError::ClassNotFound(name.to_owned()))?,
        None => {
            let mut defaults: Vec<&BucketClass> = classes
                .iter()
                .filter(|c| c.is_default_bucket_class)
                .collect();
            match defaults.len() {
                0 => {
                    return Err(CosiError::NoDefaultClass {
                        protocol: protocol.signature,
                    });
                }
                1 => defaults.remove(0).clone(),
                _ => {
                    let mut candidates: Vec<String> = defaults
                        .iter()
                        .map(|c| c.metadata.name.clone())
                        .collect();
                    candidates.sort();
                    return Err(CosiError::AmbiguousDefault { candidates });
                }
            }
        }
    };

    check_protocol(
        protocol.signature,
        &class.supported_protocols,
        &class.metadata.name,
    )?;
    Ok(class)
}

/// Select the access class named by a request, if any.
///
/// The protocol has no default flag for access classes; a missing name means
/// no class constraints apply and `Ok(None)` is returned.  A named class
/// with a non-empty supported-protocol set must list the bucket's protocol.
pub fn resolve_access_class(
    explicit: Option<&str>,
    protocol: &Protocol,
    classes: &[BucketAccessClass],
) -> Result<Option<BucketAccessClass>, CosiError> {
    let Some(name) = explicit else {
        return Ok(None);
    };
    let class = classes
        .iter()
        .find(|c| c.metadata.name == name)
        .cloned()
        .ok_or_else(|| CosiError::ClassNotFound(name.to_owned()))?;

    if !class.supported_protocols.is_empty() {
        check_protocol(
            protocol.signature,
            &class.supported_protocols,
            &class.metadata.name,
        )?;
    }
    Ok(Some(class))
}

fn check_protocol(
    requested: ProtocolSignature,
    supported: &[ProtocolSignature],
    target: &str,
) -> Result<(), CosiError> {
    if supported.contains(&requested) {
        Ok(())
    } else {
        Err(CosiError::ProtocolMismatch {
            protocol: requested,
            target: target.to_owned(),
        })
    }
}

/// Namespace permission law: the allow-list is the union of the bucket's
/// `permitted_namespaces` and its class's `additional_permitted_namespaces`.
/// An empty union imposes no restriction.
pub fn namespace_permitted(namespace: &str, bucket: &Bucket, class: Option<&BucketClass>) -> bool {
    let bucket_refs = bucket.spec.permitted_namespaces.iter();
    let class_refs = class
        .map(|c| c.additional_permitted_namespaces.as_slice())
        .unwrap_or_default()
        .iter();

    let mut union = bucket_refs.chain(class_refs).peekable();
    if union.peek().is_none() {
        return true;
    }
    union.any(|r| r.name == namespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BucketSpec, NamespaceRef, ObjectMeta};

    fn class(name: &str, default: bool, protocols: &[ProtocolSignature]) -> BucketClass {
        BucketClass {
            metadata: ObjectMeta::cluster(name),
            provisioner: "p1".into(),
            is_default_bucket_class: default,
            additional_permitted_namespaces: Vec::new(),
            supported_protocols: protocols.to_vec(),
            anonymous_access_modes: Vec::new(),
            release_policy: Default::default(),
            parameters: Default::default(),
        }
    }

    fn s3() -> Protocol {
        Protocol::new(ProtocolSignature::S3)
    }

    #[test]
    fn explicit_class_selected() {
        let classes = vec![
            class("gold", false, &[ProtocolSignature::S3]),
            class("silver", true, &[ProtocolSignature::S3]),
        ];
        let resolved = resolve_bucket_class(Some("gold"), &s3(), &classes).unwrap();
        assert_eq!(resolved.metadata.name, "gold");
    }

    #[test]
    fn explicit_class_missing() {
        let err = resolve_bucket_class(Some("gold"), &s3(), &[]).unwrap_err();
        assert_eq!(err, CosiError::ClassNotFound("gold".into()));
    }

    #[test]
    fn default_class_selected() {
        let classes = vec![
            class("gold", false, &[ProtocolSignature::S3]),
            class("default-s3", true, &[ProtocolSignature::S3]),
        ];
        let resolved = resolve_bucket_class(None, &s3(), &classes).unwrap();
        assert_eq!(resolved.metadata.name, "default-s3");
    }

    #[test]
    fn no_default_class() {
        let classes = vec![class("gold", false, &[ProtocolSignature::S3])];
        let err = resolve_bucket_class(None, &s3(), &classes).unwrap_err();
        assert!(matches!(err, CosiError::NoDefaultClass { .. }));
    }

    #[test]
    fn ambiguous_default_is_an_error() {
        let classes = vec![
            class("b-default", true, &[ProtocolSignature::S3]),
            class("a-default", true, &[ProtocolSignature::S3]),
        ];
        let err = resolve_bucket_class(None, &s3(), &classes).unwrap_err();
        assert_eq!(
            err,
            CosiError::AmbiguousDefault {
                candidates: vec!["a-default".into(), "b-default".into()],
            }
        );
    }

    #[test]
    fn protocol_checked_after_selection() {
        let classes = vec![class("gcs-only", true, &[ProtocolSignature::Gcs])];
        let err = resolve_bucket_class(None, &s3(), &classes).unwrap_err();
        assert!(matches!(err, CosiError::ProtocolMismatch { .. }));

        let err = resolve_bucket_class(Some("gcs-only"), &s3(), &classes).unwrap_err();
        assert!(matches!(err, CosiError::ProtocolMismatch { .. }));
    }

    #[test]
    fn access_class_optional() {
        assert_eq!(resolve_access_class(None, &s3(), &[]).unwrap(), None);
    }

    #[test]
    fn access_class_protocol_constraint() {
        let classes = vec![BucketAccessClass {
            metadata: ObjectMeta::cluster("readers"),
            provisioner: "p1".into(),
            policy_actions: Default::default(),
            supported_protocols: vec![ProtocolSignature::Gcs],
            parameters: Default::default(),
        }];
        let err = resolve_access_class(Some("readers"), &s3(), &classes).unwrap_err();
        assert!(matches!(err, CosiError::ProtocolMismatch { .. }));

        // Empty supported set means unconstrained.
        let unconstrained = vec![BucketAccessClass {
            metadata: ObjectMeta::cluster("any"),
            provisioner: "p1".into(),
            policy_actions: Default::default(),
            supported_protocols: Vec::new(),
            parameters: Default::default(),
        }];
        let resolved = resolve_access_class(Some("any"), &s3(), &unconstrained).unwrap();
        assert_eq!(resolved.unwrap().metadata.name, "any");
    }

    fn bucket(permitted: &[&str]) -> Bucket {
        Bucket::new(
            "b1",
            BucketSpec {
                provisioner: "p1".into(),
                release_policy: Default::default(),
                anonymous_access_mode: Default::default(),
                bucket_class_name: None,
                permitted_namespaces: permitted.iter().map(|n| NamespaceRef::named(*n)).collect(),
                protocol: s3(),
                parameters: Default::default(),
                bucket_request: None,
            },
        )
    }

    #[test]
    fn empty_union_is_open() {
        assert!(namespace_permitted("ns-a", &bucket(&[]), None));
    }

    #[test]
    fn bucket_namespaces_checked() {
        let b = bucket(&["ns-a"]);
        assert!(namespace_permitted("ns-a", &b, None));
        assert!(!namespace_permitted("ns-b", &b, None));
    }

    #[test]
    fn class_namespaces_extend_the_union() {
        let b = bucket(&["ns-a"]);
        let mut c = class("gold", false, &[ProtocolSignature::S3]);
        c.additional_permitted_namespaces = vec![NamespaceRef::named("ns-b")];
        assert!(namespace_permitted("ns-b", &b, Some(&c)));
        assert!(!namespace_permitted("ns-c", &b, Some(&c)));
    }
}
