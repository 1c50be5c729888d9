//! Interaction requests and the UI actions they resolve to

use serde::{Deserialize, Serialize};
use star_core::{DataReader, DataResult, DataWriter, Json};
use star_math::Vec2F;

use crate::entity::{EntityId, NULL_ENTITY_ID};

/// Sent by a client, always resolved on the server
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractRequest {
    pub source_id: EntityId,
    pub source_position: Vec2F,
    pub target_id: EntityId,
    pub interact_position: Vec2F,
}

impl InteractRequest {
    pub fn write(&self, out: &mut DataWriter) {
        out.write_vlq_i(self.source_id as i64);
        out.write_f32(self.source_position.x);
        out.write_f32(self.source_position.y);
        out.write_vlq_i(self.target_id as i64);
        out.write_f32(self.interact_position.x);
        out.write_f32(self.interact_position.y);
    }

    pub fn read(input: &mut DataReader<'_>) -> DataResult<Self> {
        Ok(Self {
            source_id: input.read_vlq_i()? as EntityId,
            source_position: Vec2F::new(input.read_f32()?, input.read_f32()?),
            target_id: input.read_vlq_i()? as EntityId,
            interact_position: Vec2F::new(input.read_f32()?, input.read_f32()?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InteractActionType {
    #[default]
    None,
    OpenContainer,
    SitDown,
    OpenCraftingInterface,
    OpenSongbookInterface,
    OpenNpcCraftingInterface,
    OpenMerchantInterface,
    OpenAiInterface,
    OpenTeleportDialog,
    ShowPopup,
    ScriptPane,
    Message,
}

impl InteractActionType {
    const ALL: [InteractActionType; 12] = [
        InteractActionType::None,
        InteractActionType::OpenContainer,
        InteractActionType::SitDown,
        InteractActionType::OpenCraftingInterface,
        InteractActionType::OpenSongbookInterface,
        InteractActionType::OpenNpcCraftingInterface,
        InteractActionType::OpenMerchantInterface,
        InteractActionType::OpenAiInterface,
        InteractActionType::OpenTeleportDialog,
        InteractActionType::ShowPopup,
        InteractActionType::ScriptPane,
        InteractActionType::Message,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        serde_json::from_value(Json::String(name.to_string())).ok()
    }

    fn index(self) -> u8 {
        Self::ALL.iter().position(|t| *t == self).unwrap_or(0) as u8
    }

    fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

/// What the requesting client should do
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InteractAction {
    pub kind: InteractActionType,
    /// Entity the action refers to
    pub entity_id: EntityId,
    pub data: Json,
}

impl InteractAction {
    pub fn none() -> Self {
        Self {
            kind: InteractActionType::None,
            entity_id: NULL_ENTITY_ID,
            data: Json::Null,
        }
    }

    pub fn new(kind: InteractActionType, entity_id: EntityId, data: Json) -> Self {
        Self {
            kind,
            entity_id,
            data,
        }
    }

    /// Read a script's answer: nil, a type name, or `[type, data]`
    pub fn from_script_result(result: &Json, entity_id: EntityId) -> Self {
        let (name, data) = match result {
            Json::String(name) => (name.as_str(), Json::Null),
            Json::Array(items) => match items.first() {
                Some(Json::String(name)) => (name.as_str(), items.get(1).cloned().unwrap_or(Json::Null)),
                _ => return Self::none(),
            },
            _ => return Self::none(),
        };
        match InteractActionType::from_name(name) {
            Some(kind) => Self::new(kind, entity_id, data),
            None => {
                log::warn!("entity {} returned unknown interact action '{}'", entity_id, name);
                Self::none()
            }
        }
    }

    pub fn is_none(&self) -> bool {
        self.kind == InteractActionType::None
    }

    pub fn write(&self, out: &mut DataWriter) {
        out.write_u8(self.kind.index());
        out.write_vlq_i(self.entity_id as i64);
        out.write_string(&self.data.to_string());
    }

    pub fn read(input: &mut DataReader<'_>) -> DataResult<Self> {
        let tag = input.read_u8()?;
        let kind = InteractActionType::from_index(tag)
            .ok_or_else(|| star_core::DataError::Invalid(format!("interact action {}", tag)))?;
        let entity_id = input.read_vlq_i()? as EntityId;
        let text = input.read_string()?;
        let data = serde_json::from_str(&text)
            .map_err(|e| star_core::DataError::Invalid(e.to_string()))?;
        Ok(Self {
            kind,
            entity_id,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_from_script_result() {
        let action = InteractAction::from_script_result(&json!("OpenContainer"), 4);
        assert_eq!(action.kind, InteractActionType::OpenContainer);
        assert_eq!(action.entity_id, 4);

        let action = InteractAction::from_script_result(&json!(["ShowPopup", {"message": "hi"}]), 4);
        assert_eq!(action.kind, InteractActionType::ShowPopup);
        assert_eq!(action.data, json!({"message": "hi"}));

        assert!(InteractAction::from_script_result(&Json::Null, 4).is_none());
        assert!(InteractAction::from_script_result(&json!("Dance"), 4).is_none());
    }

    #[test]
    fn test_action_encoding() {
        let action = InteractAction::new(InteractActionType::ScriptPane, 9, json!("/panes/x.config"));
        let mut out = DataWriter::new();
        action.write(&mut out);
        let bytes = out.into_bytes();
        assert_eq!(InteractAction::read(&mut DataReader::new(&bytes)).unwrap(), action);
    }
}
