use courier_protocol::{Envelope, MergeTemplate, OperationInfo, new_id};

/// Builds the envelope for an outbound call.
///
/// Inject a custom factory through [`crate::PipelineBuilder::factory`] to add
/// fields (targets, extensions, signatures) before handlers see the message.
pub trait MessageFactory<Out>: Send + Sync {
    fn create(
        &self,
        pipeline_id: &str,
        template: &Out,
        data: Out,
        operation: OperationInfo,
    ) -> Envelope<Out>;
}

/// Layers caller data over the template and stamps fresh identity fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMessageFactory;

impl<Out: MergeTemplate> MessageFactory<Out> for DefaultMessageFactory {
    fn create(
        &self,
        pipeline_id: &str,
        template: &Out,
        data: Out,
        operation: OperationInfo,
    ) -> Envelope<Out> {
        Envelope::new(data.merge_over(template))
            .with_source(pipeline_id)
            .with_operation(new_id(), operation)
    }
}
