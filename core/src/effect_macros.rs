//! Declarative macros for ergonomic effect construction

/// Create an `Effect::PublishEvent` operation
///
/// # Example
///
/// ```rust,ignore
/// use dentalbook_core::publish_event;
///
/// publish_event! {
///     bus: env.event_bus,
///     topic: "cita.events",
///     event: serialized_event,
///     on_success: || None,
///     on_error: |error| Some(AppointmentAction::PublishFailed { reason: error.to_string() })
/// }
/// ```
#[macro_export]
macro_rules! publish_event {
    (
        bus: $bus:expr,
        topic: $topic:expr,
        event: $event:expr,
        on_success: || $success_body:expr,
        on_error: |$error_param:ident| $error_body:expr
    ) => {
        $crate::effect::Effect::PublishEvent(
            $crate::effect::EventBusOperation::Publish {
                event_bus: ::std::sync::Arc::clone(&$bus),
                topic: $topic.to_string(),
                event: $event,
                on_success: ::std::boxed::Box::new(move |()| $success_body),
                on_error: ::std::boxed::Box::new(move |$error_param| $error_body),
            }
        )
    };
}

/// Create an `Effect::Future` from an async block
///
/// # Example
///
/// ```rust,ignore
/// use dentalbook_core::async_effect;
///
/// async_effect! {
///     fanout.broadcast(&room, notification).await;
///     None
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}
