//! In-band tags for the two stream directions.
//!
//! Each command or message record starts with one of these tags; the tag
//! dictates the exact sequence of POD fields and side-car objects that
//! follow. There are no length prefixes — a reader that loses step with a
//! writer is a bug, and decode panics rather than resynchronising.
//!
//! `CommandLoopBreak` and `MessageLoopBreak` are break-out sentinels: they
//! end the current drain (or message pass) and must never be reused for
//! anything else.

use core_stream::Pod;

macro_rules! wire_tag {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident { $($variant:ident),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u8)]
        $vis enum $name { $($variant),+ }

        impl Pod for $name {
            const WIDTH: usize = 1;

            fn encode(self, dst: &mut [u8]) {
                dst[0] = self as u8;
            }

            fn decode(src: &[u8]) -> Self {
                const ALL: &[$name] = &[$($name::$variant),+];
                match ALL.get(src[0] as usize) {
                    Some(tag) => *tag,
                    None => panic!(
                        concat!("corrupt stream: unknown ", stringify!($name), " {}"),
                        src[0]
                    ),
                }
            }
        }
    };
}

wire_tag!(
    /// Recorder -> executor directives.
    pub(crate) enum CommandTag {
        LoadFile,
        DeleteFile,
        InstantiateArtboard,
        DeleteArtboard,
        InstantiateStateMachine,
        DeleteStateMachine,
        AdvanceStateMachine,
        BindViewModel,
        PointerMove,
        PointerDown,
        PointerUp,
        PointerExit,
        InstantiateViewModel,
        InstantiateBlankViewModel,
        InstantiateViewModelForArtboard,
        InstantiateBlankViewModelForArtboard,
        DeleteViewModel,
        ReferenceNestedViewModel,
        ReferenceListViewModel,
        SetProperty,
        FireTrigger,
        RequestProperty,
        RequestListSize,
        ListInsert,
        ListAppend,
        ListRemove,
        ListSwap,
        Subscribe,
        Unsubscribe,
        DecodeImage,
        DecodeAudio,
        DecodeFont,
        AddExternalImage,
        AddExternalAudio,
        AddExternalFont,
        DeleteImage,
        DeleteAudio,
        DeleteFont,
        AddGlobalImage,
        AddGlobalAudio,
        AddGlobalFont,
        RemoveGlobalImage,
        RemoveGlobalAudio,
        RemoveGlobalFont,
        ListArtboards,
        ListStateMachines,
        ListViewModels,
        ListViewModelInstanceNames,
        ListViewModelProperties,
        ListViewModelEnums,
        RequestDefaultViewModelInfo,
        RunOnce,
        Draw,
        Disconnect,
        CommandLoopBreak,
    }
);

wire_tag!(
    /// Executor -> recorder notifications.
    pub(crate) enum MessageTag {
        MessageLoopBreak,
        FileLoaded,
        FileError,
        FileDeleted,
        ArtboardsListed,
        ViewModelsListed,
        ViewModelInstanceNamesListed,
        ViewModelPropertiesListed,
        ViewModelEnumsListed,
        ArtboardDeleted,
        ArtboardError,
        StateMachinesListed,
        DefaultViewModelInfo,
        StateMachineDeleted,
        StateMachineError,
        StateMachineSettled,
        ViewModelDeleted,
        ViewModelError,
        ViewModelData,
        ViewModelListSize,
        RenderImageDecoded,
        RenderImageDeleted,
        RenderImageError,
        AudioSourceDecoded,
        AudioSourceDeleted,
        AudioSourceError,
        FontDecoded,
        FontDeleted,
        FontError,
    }
);
